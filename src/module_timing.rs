use embassy_time::Duration;

/// Active time of `RESET_N` to trigger a module reset
pub fn reset_time() -> Duration {
    Duration::from_millis(150)
}

/// Active time of `PWRKEY` to switch the module on
pub fn pwr_on_time() -> Duration {
    Duration::from_millis(600)
}

/// Time to wait for module to boot
pub fn boot_time() -> Duration {
    Duration::from_secs(5)
}

/// Interval between autobaud attempts
pub const SYNC_RETRY_INTERVAL: Duration = Duration::from_millis(500);
pub const MAX_SYNC_ATTEMPTS: u8 = 10;

/// Settling window after a rejected `ATE0`
pub const ECHO_SETTLE_TIME: Duration = Duration::from_secs(1);

/// Interval between signal quality queries while the reading is unknown
pub const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Wait before the blind attach retry that follows operator selection
pub const ATTACH_FALLBACK_DELAY: Duration = Duration::from_secs(30);
/// Linear attach back-off step, multiplied by the retry count
pub const ATTACH_BACKOFF_STEP: Duration = Duration::from_secs(2);
pub const MAX_ATTACH_RETRIES: u8 = 3;

/// Delay before opening a port 443 socket, leaving room for TLS setup
pub const TLS_OPEN_DELAY: Duration = Duration::from_secs(3);
pub const OPEN_RETRY_DELAY: Duration = Duration::from_secs(3);
pub const MAX_OPEN_RETRIES: u8 = 5;

/// Guard for the `>` prompt after `AT+QISEND`
pub const SEND_PROMPT_TIMEOUT: Duration = Duration::from_secs(1);
/// Guard for `SEND OK`/`SEND FAIL` after the payload is written
pub const SEND_RESULT_TIMEOUT: Duration = Duration::from_secs(1);
