//! ### Packet domain and PDP context commands
pub mod types;

use atat::atat_derive::AtatCmd;
use types::{ContextType, GPRSAttachedState};

use super::NoResponse;

/// PS attach or detach +CGATT
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGATT", NoResponse, timeout_ms = 75000)]
pub struct SetGPRSAttached {
    #[at_arg(position = 0)]
    pub state: GPRSAttachedState,
}

/// Configure parameters of a TCP/IP context +QICSGP
#[derive(Clone, AtatCmd)]
#[at_cmd("+QICSGP", NoResponse, timeout_ms = 30000)]
pub struct SetContextConfig<'a> {
    #[at_arg(position = 0)]
    pub context_id: u8,
    #[at_arg(position = 1)]
    pub context_type: ContextType,
    #[at_arg(position = 2, len = 64)]
    pub apn: &'a str,
    #[at_arg(position = 3, len = 64)]
    pub username: &'a str,
    #[at_arg(position = 4, len = 64)]
    pub password: &'a str,
}

/// Activate a PDP context +QIACT
#[derive(Clone, AtatCmd)]
#[at_cmd("+QIACT", NoResponse, timeout_ms = 30000)]
pub struct ActivateContext {
    #[at_arg(position = 0)]
    pub context_id: u8,
}

/// Activate a PDP context +QIACT, read form
///
/// Lists every active context as `+QIACT: <id>,<state>,<type>,"<ip>"`.
#[derive(Clone, AtatCmd)]
#[at_cmd("+QIACT?", NoResponse)]
pub struct GetContextState;

/// Deactivate a PDP context +QIDEACT
///
/// Also used to acknowledge a `pdpdeact` notification.
#[derive(Clone, AtatCmd)]
#[at_cmd("+QIDEACT", NoResponse, timeout_ms = 40000)]
pub struct DeactivateContext {
    #[at_arg(position = 0)]
    pub context_id: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use atat::AtatCmd;

    #[test]
    fn context_config_encoding() {
        let mut buf = [0u8; 128];
        let len = SetContextConfig {
            context_id: 1,
            context_type: ContextType::IPv4,
            apn: "iot.example",
            username: "",
            password: "",
        }
        .write(&mut buf);
        assert_eq!(
            &buf[..len],
            b"AT+QICSGP=1,1,\"iot.example\",\"\",\"\"\r\n"
        );
        assert_eq!(SetContextConfig::MAX_TIMEOUT_MS, 30000);
    }

    #[test]
    fn attach_encoding() {
        let mut buf = [0u8; 32];
        let len = SetGPRSAttached {
            state: GPRSAttachedState::Attached,
        }
        .write(&mut buf);
        assert_eq!(&buf[..len], b"AT+CGATT=1\r\n");
        assert_eq!(SetGPRSAttached::MAX_TIMEOUT_MS, 75000);
    }
}
