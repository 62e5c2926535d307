//! Webhook authenticity checks. Both checks compare in constant time so a
//! forged request learns nothing from response latency.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies an `sha256=<hex>` signature header over the raw request body.
pub fn verify_hmac_signature(secret: &[u8], body: &[u8], header: &str) -> bool {
    let Some(hex) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Some(expected) = decode_hex(hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Verifies a shared-secret header token (the Telegram webhook scheme).
pub fn verify_secret_token(expected: &str, presented: &str) -> bool {
    constant_time_eq(expected.as_bytes(), presented.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b) {
        diff |= left ^ right;
    }
    diff == 0
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(hex.get(index..index + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use super::{verify_hmac_signature, verify_secret_token};

    fn sign(secret: &[u8], body: &[u8]) -> String {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(body);
        let digest = mac.finalize().into_bytes();
        let mut hex = String::from("sha256=");
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"entry":[]}"#;
        let header = sign(b"app-secret", body);
        assert!(verify_hmac_signature(b"app-secret", body, &header));
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails() {
        let body = br#"{"entry":[]}"#;
        let header = sign(b"app-secret", body);
        assert!(!verify_hmac_signature(b"app-secret", br#"{"entry":[1]}"#, &header));
        assert!(!verify_hmac_signature(b"other-secret", body, &header));
        assert!(!verify_hmac_signature(b"app-secret", body, "sha256=zz"));
        assert!(!verify_hmac_signature(b"app-secret", body, "md5=00"));
    }

    #[test]
    fn secret_token_requires_exact_match() {
        assert!(verify_secret_token("hook-secret", "hook-secret"));
        assert!(!verify_secret_token("hook-secret", "hook-secre"));
        assert!(!verify_secret_token("hook-secret", "hook-secret "));
    }
}
