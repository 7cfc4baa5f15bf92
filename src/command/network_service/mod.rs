//! ### Network service commands
pub mod responses;
pub mod types;

use atat::atat_derive::AtatCmd;
use responses::SignalQuality;
use types::OperatorSelectionMode;

use super::NoResponse;

/// Signal quality +CSQ
///
/// `rssi` of 99 means the module has no reading yet.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CSQ", SignalQuality)]
pub struct GetSignalQuality;

/// Operator selection +COPS
///
/// Forces an attempt to select and register with the given network operator.
#[derive(Clone, AtatCmd)]
#[at_cmd("+COPS", NoResponse, timeout_ms = 180000)]
pub struct SetOperatorSelection {
    #[at_arg(position = 0)]
    pub mode: OperatorSelectionMode,
}

/// Operator selection +COPS, test form
///
/// Scans and lists the operators present in the network.
#[derive(Clone, AtatCmd)]
#[at_cmd("+COPS=?", NoResponse, timeout_ms = 180000)]
pub struct GetOperatorList;

/// Operator selection +COPS, read form
#[derive(Clone, AtatCmd)]
#[at_cmd("+COPS?", NoResponse)]
pub struct GetOperatorSelection;

/// Operator name from a `+COPS: <mode>[,<format>,"<oper>"[,<AcT>]]` line.
pub(crate) fn operator_name(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("+COPS:")?;
    let name = rest.split(',').nth(2)?.trim().trim_matches('"');
    (!name.is_empty()).then_some(name)
}
