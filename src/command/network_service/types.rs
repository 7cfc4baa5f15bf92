//! Argument and parameter types used by Network service Commands and Responses
use atat::atat_derive::AtatEnum;

/// Network registration mode of +COPS
#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
pub enum OperatorSelectionMode {
    /// Automatic, `<oper>` is ignored
    Automatic = 0,
    Manual = 1,
    Deregister = 2,
    FormatOnly = 3,
    ManualAutomatic = 4,
}
