//! Responses for Network service Commands
use atat::atat_derive::AtatResp;

/// Signal quality +CSQ
#[derive(Debug, Clone, PartialEq, Eq, AtatResp)]
pub struct SignalQuality {
    #[at_arg(position = 0)]
    pub rssi: u8,
    #[at_arg(position = 1)]
    pub ber: u8,
}

impl SignalQuality {
    pub fn is_known(&self) -> bool {
        self.rssi != 99
    }
}
