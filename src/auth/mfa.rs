//! Per-method MFA request shapes.
//!
//! Each delivery method owns its resend/submit URL, payload, and response
//! validator. Trusted-device codes go through the `trusteddevice` endpoints
//! with no payload on resend; SMS and voice share the `phone` endpoints and
//! differ only in `mode`.

use serde_json::{json, Value};

use crate::mfa::MfaMethod;

/// Default phone number ID when the intake request doesn't name one.
pub const DEFAULT_PHONE_NUMBER_ID: u32 = 1;

pub fn resend_url(method: MfaMethod, auth_endpoint: &str) -> String {
    match method {
        MfaMethod::Device => format!("{auth_endpoint}/verify/trusteddevice"),
        MfaMethod::Sms | MfaMethod::Voice => format!("{auth_endpoint}/verify/phone"),
    }
}

pub fn resend_payload(method: MfaMethod, phone_number_id: u32) -> Option<Value> {
    match method {
        MfaMethod::Device => None,
        MfaMethod::Sms => Some(json!({
            "phoneNumber": { "id": phone_number_id },
            "mode": "sms",
        })),
        MfaMethod::Voice => Some(json!({
            "phoneNumber": { "id": phone_number_id },
            "mode": "voice",
        })),
    }
}

/// Whether a resend response means Apple actually dispatched a code.
/// Phone methods echo the trusted phone number back on success.
pub fn resend_accepted(method: MfaMethod, status: u16, body: &Value) -> bool {
    match method {
        MfaMethod::Device => (200..300).contains(&status),
        MfaMethod::Sms | MfaMethod::Voice => {
            (200..300).contains(&status) && !body["trustedPhoneNumber"]["id"].is_null()
        }
    }
}

pub fn submit_url(method: MfaMethod, auth_endpoint: &str) -> String {
    match method {
        MfaMethod::Device => format!("{auth_endpoint}/verify/trusteddevice/securitycode"),
        MfaMethod::Sms | MfaMethod::Voice => {
            format!("{auth_endpoint}/verify/phone/securitycode")
        }
    }
}

pub fn submit_payload(method: MfaMethod, code: &str, phone_number_id: u32) -> Value {
    match method {
        MfaMethod::Device => json!({
            "securityCode": { "code": code },
        }),
        MfaMethod::Sms => json!({
            "securityCode": { "code": code },
            "phoneNumber": { "id": phone_number_id },
            "mode": "sms",
        }),
        MfaMethod::Voice => json!({
            "securityCode": { "code": code },
            "phoneNumber": { "id": phone_number_id },
            "mode": "voice",
        }),
    }
}

/// Whether a submit response means the code was accepted. Trusted-device
/// submissions come back `204 No Content`; phone submissions `200`.
pub fn submit_accepted(method: MfaMethod, status: u16) -> bool {
    match method {
        MfaMethod::Device => status == 204 || status == 200,
        MfaMethod::Sms | MfaMethod::Voice => status == 200,
    }
}

/// Apple's "incorrect verification code" service error, surfaced in error
/// response bodies.
pub const WRONG_CODE_MARKER: &str = "-21669";

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH: &str = "https://idmsa.apple.com/appleauth/auth";

    #[test]
    fn device_urls_and_payloads() {
        assert_eq!(
            resend_url(MfaMethod::Device, AUTH),
            format!("{AUTH}/verify/trusteddevice")
        );
        assert!(resend_payload(MfaMethod::Device, 1).is_none());
        let submit = submit_payload(MfaMethod::Device, "123456", 1);
        assert_eq!(submit["securityCode"]["code"], "123456");
        assert!(submit.get("phoneNumber").is_none());
    }

    #[test]
    fn phone_methods_share_endpoint_but_not_mode() {
        assert_eq!(
            resend_url(MfaMethod::Sms, AUTH),
            resend_url(MfaMethod::Voice, AUTH)
        );
        let sms = resend_payload(MfaMethod::Sms, 2).unwrap();
        assert_eq!(sms["mode"], "sms");
        assert_eq!(sms["phoneNumber"]["id"], 2);
        let voice = resend_payload(MfaMethod::Voice, 2).unwrap();
        assert_eq!(voice["mode"], "voice");
    }

    #[test]
    fn phone_resend_requires_trusted_number_echo() {
        let ok = json!({"trustedPhoneNumber": {"id": 1, "numberWithDialCode": "+1 (***) ***-**00"}});
        assert!(resend_accepted(MfaMethod::Sms, 200, &ok));
        assert!(!resend_accepted(MfaMethod::Sms, 200, &json!({})));
        assert!(!resend_accepted(MfaMethod::Sms, 423, &ok));
    }

    #[test]
    fn device_resend_only_needs_2xx() {
        assert!(resend_accepted(MfaMethod::Device, 202, &json!({})));
        assert!(!resend_accepted(MfaMethod::Device, 500, &json!({})));
    }

    #[test]
    fn submit_status_validation() {
        assert!(submit_accepted(MfaMethod::Device, 204));
        assert!(!submit_accepted(MfaMethod::Device, 400));
        assert!(submit_accepted(MfaMethod::Sms, 200));
        assert!(!submit_accepted(MfaMethod::Sms, 204));
    }
}
