//! ### General commands

use atat::atat_derive::AtatCmd;

use super::NoResponse;

/// Request TA revision identification of software release +GMR
#[derive(Clone, AtatCmd)]
#[at_cmd("+GMR", NoResponse)]
pub struct GetFirmwareVersion;

/// Show ICCID +QCCID
///
/// Returns the ICCID (Integrated Circuit Card ID) of the SIM-card.
#[derive(Clone, AtatCmd)]
#[at_cmd("+QCCID", NoResponse)]
pub struct GetCCID;

/// ICCID carried by a `+QCCID` line. Some firmware answers with the bare
/// number, which is accepted too.
pub(crate) fn ccid(line: &str) -> Option<&str> {
    if let Some(v) = super::field(line, "+QCCID:") {
        return (!v.is_empty()).then_some(v);
    }
    let bare = line.len() >= 18 && line.bytes().all(|b| b.is_ascii_alphanumeric());
    bare.then_some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ccid() {
        assert_eq!(
            ccid("+QCCID: 89450421180216254864"),
            Some("89450421180216254864")
        );
        assert_eq!(ccid("8945042118021625486F"), Some("8945042118021625486F"));
        assert_eq!(ccid("OK"), None);
        assert_eq!(ccid("+QCCID: "), None);
    }
}
