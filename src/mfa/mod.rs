//! Multi-factor input channel.
//!
//! The auth state machine never talks to the user directly: second-factor
//! codes and resend requests arrive as typed messages on a single mpsc
//! channel, fed by the local intake HTTP server (or by tests).

pub mod server;

/// How the second factor is delivered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaMethod {
    Device,
    Sms,
    Voice,
}

impl MfaMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MfaMethod::Device => "device",
            MfaMethod::Sms => "sms",
            MfaMethod::Voice => "voice",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "device" => Some(MfaMethod::Device),
            "sms" => Some(MfaMethod::Sms),
            "voice" => Some(MfaMethod::Voice),
            _ => None,
        }
    }
}

impl std::fmt::Display for MfaMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message from the intake channel to the auth state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MfaMessage {
    /// A six-digit code for the given method.
    Submit { method: MfaMethod, code: String },
    /// Ask Apple to send a fresh code.
    Resend {
        method: MfaMethod,
        phone_number_id: u32,
    },
}

/// Validate the wire format of a security code: exactly six ASCII digits.
pub fn valid_code(code: &str) -> bool {
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
}
