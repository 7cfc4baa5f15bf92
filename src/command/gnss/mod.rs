//! ### GNSS commands

use atat::atat_derive::AtatCmd;

use super::NoResponse;

/// Turn on GNSS +QGPS
///
/// `+CME ERROR: 504` (session already ongoing) is harmless.
#[derive(Clone, AtatCmd)]
#[at_cmd("+QGPS", NoResponse)]
pub struct TurnOnGnss {
    #[at_arg(position = 0)]
    pub mode: u8,
}

/// Turn off GNSS +QGPSEND
#[derive(Clone, AtatCmd)]
#[at_cmd("+QGPSEND", NoResponse)]
pub struct TurnOffGnss;

/// Acquire positioning information +QGPSLOC
///
/// Mode 2 reports latitude and longitude in signed decimal degrees:
/// `+QGPSLOC: <UTC>,<lat>,<lon>,<hdop>,<alt>,<fix>,<cog>,<spkm>,<spkn>,<date>,<nsat>`
#[derive(Clone, AtatCmd)]
#[at_cmd("+QGPSLOC", NoResponse, timeout_ms = 2000)]
pub struct AcquirePosition {
    #[at_arg(position = 0)]
    pub mode: u8,
}

fn is_coordinate(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && digits.bytes().filter(|&b| b == b'.').count() <= 1
}

/// `(longitude, latitude)` of a well formed `+QGPSLOC` line.
pub(crate) fn position(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("+QGPSLOC:")?;
    let mut fields = rest.trim().split(',');
    let _utc = fields.next()?;
    let lat = fields.next()?.trim();
    let lon = fields.next()?.trim();
    (is_coordinate(lat) && is_coordinate(lon)).then_some((lon, lat))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fix() {
        let line = "+QGPSLOC: 061951.000,31.16334,-121.62806,0.7,62.2,2,0.00,0.0,0.0,110513,09";
        assert_eq!(position(line), Some(("-121.62806", "31.16334")));
    }

    #[test]
    fn reject_malformed() {
        assert_eq!(position("+QGPSLOC: 061951.000,,,"), None);
        assert_eq!(position("+QGPSLOC: 061951.000,N3116.334"), None);
        assert_eq!(position("+CME ERROR: 516"), None);
    }
}
