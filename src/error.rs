use std::fmt;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why the link ended, using the classic pppd exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Ok,
    FatalError,
    OptionError,
    UserRequest,
    ConnectFailed,
    NegotiationFailed,
    PeerAuthFailed,
    IdleTimeout,
    PeerDead,
    Hangup,
    Loopback,
    AuthTopeerFailed,
    /// Too many failed logins by the peer; terminates the process
    TooManyLoginFailures,
}

impl ExitStatus {
    /// Process exit code
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::FatalError | ExitStatus::TooManyLoginFailures => 1,
            ExitStatus::OptionError => 2,
            ExitStatus::UserRequest => 5,
            ExitStatus::ConnectFailed => 8,
            ExitStatus::NegotiationFailed => 10,
            ExitStatus::PeerAuthFailed => 11,
            ExitStatus::IdleTimeout => 12,
            ExitStatus::PeerDead => 15,
            ExitStatus::Hangup => 16,
            ExitStatus::Loopback => 17,
            ExitStatus::AuthTopeerFailed => 19,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExitStatus::Ok => "ok",
            ExitStatus::FatalError => "fatal error",
            ExitStatus::OptionError => "option error",
            ExitStatus::UserRequest => "user request",
            ExitStatus::ConnectFailed => "connect failed",
            ExitStatus::NegotiationFailed => "negotiation failed",
            ExitStatus::PeerAuthFailed => "peer failed to authenticate",
            ExitStatus::IdleTimeout => "idle timeout",
            ExitStatus::PeerDead => "peer not responding",
            ExitStatus::Hangup => "hangup",
            ExitStatus::Loopback => "loopback detected",
            ExitStatus::AuthTopeerFailed => "failed to authenticate to peer",
            ExitStatus::TooManyLoginFailures => "too many login failures",
        };
        write!(f, "{} ({})", text, self.code())
    }
}
