use crate::{error::CryptoError, serde_base64};
use openssl::bn::{BigNum, BigNumRef};
use openssl::pkey::{Private, Public};
use openssl::rsa::Rsa;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};

pub const DEFAULT_KEY_BITS: u32 = 2048;

/// RSA private key decomposed in the `RSAParameters` layout the runner agent
/// reads from `.credentials_rsaparams`. Every component is a big-endian byte string.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsaParameters {
    #[serde(with = "serde_base64", default)]
    pub d: Vec<u8>,
    #[serde(with = "serde_base64", default)]
    pub dp: Vec<u8>,
    #[serde(with = "serde_base64", default)]
    pub dq: Vec<u8>,
    #[serde(with = "serde_base64", default)]
    pub exponent: Vec<u8>,
    #[serde(with = "serde_base64", default)]
    pub inverse_q: Vec<u8>,
    #[serde(with = "serde_base64", default)]
    pub modulus: Vec<u8>,
    #[serde(with = "serde_base64", default)]
    pub p: Vec<u8>,
    #[serde(with = "serde_base64", default)]
    pub q: Vec<u8>,
}

impl Debug for RsaParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaParameters")
            .field("modulus_len", &self.modulus.len())
            .field("exponent", &self.exponent)
            .field("private", &"<redacted>")
            .finish()
    }
}

impl RsaParameters {
    /// Generates a fresh 2048 bits key.
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with_bits(DEFAULT_KEY_BITS)
    }

    pub fn generate_with_bits(bits: u32) -> Result<Self, CryptoError> {
        let key = Rsa::generate(bits)?;
        Self::from_private_key(&key)
    }

    pub fn from_private_key(key: &Rsa<Private>) -> Result<Self, CryptoError> {
        let component = |value: Option<&BigNumRef>, name: &'static str| {
            value
                .map(BigNumRef::to_vec)
                .ok_or(CryptoError::IncompleteKey(name))
        };

        Ok(Self {
            d: key.d().to_vec(),
            dp: component(key.dmp1(), "dp")?,
            dq: component(key.dmq1(), "dq")?,
            exponent: key.e().to_vec(),
            inverse_q: component(key.iqmp(), "inverseQ")?,
            modulus: key.n().to_vec(),
            p: component(key.p(), "p")?,
            q: component(key.q(), "q")?,
        })
    }

    /// Rebuilds the private key, CRT values included.
    pub fn to_private_key(&self) -> Result<Rsa<Private>, CryptoError> {
        let key = Rsa::from_private_components(
            Self::big_num(&self.modulus, "modulus")?,
            Self::big_num(&self.exponent, "exponent")?,
            Self::big_num(&self.d, "d")?,
            Self::big_num(&self.p, "p")?,
            Self::big_num(&self.q, "q")?,
            Self::big_num(&self.dp, "dp")?,
            Self::big_num(&self.dq, "dq")?,
            Self::big_num(&self.inverse_q, "inverseQ")?,
        )?;
        key.check_key()?;
        Ok(key)
    }

    pub fn to_public_key(&self) -> Result<Rsa<Public>, CryptoError> {
        Ok(Rsa::from_public_components(
            Self::big_num(&self.modulus, "modulus")?,
            Self::big_num(&self.exponent, "exponent")?,
        )?)
    }

    /// PKCS#1 DER encoding of the private key, the format expected by the JWT signer.
    pub fn to_pkcs1_der(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.to_private_key()?.private_key_to_der()?)
    }

    fn big_num(bytes: &[u8], name: &'static str) -> Result<BigNum, CryptoError> {
        if bytes.is_empty() {
            return Err(CryptoError::IncompleteKey(name));
        }
        Ok(BigNum::from_slice(bytes)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::OnceLock;

    /// Key generation is slow in debug builds, tests share a single key.
    pub(crate) fn test_params() -> RsaParameters {
        static PARAMS: OnceLock<RsaParameters> = OnceLock::new();
        PARAMS
            .get_or_init(|| RsaParameters::generate().unwrap())
            .clone()
    }

    #[test]
    fn test_generate_emits_every_component() {
        let params = test_params();
        assert_eq!(params.modulus.len(), 256);
        assert_eq!(params.exponent, vec![0x01, 0x00, 0x01]);
        for component in [
            &params.d,
            &params.p,
            &params.q,
            &params.dp,
            &params.dq,
            &params.inverse_q,
        ] {
            assert!(!component.is_empty());
        }
    }

    #[test]
    fn test_private_key_round_trip() {
        let params = test_params();
        let key = params.to_private_key().unwrap();
        assert_eq!(RsaParameters::from_private_key(&key).unwrap(), params);
    }

    #[test]
    fn test_public_key_recovers_modulus_and_exponent() {
        let params = test_params();
        let public = params.to_public_key().unwrap();
        assert_eq!(public.n().to_vec(), params.modulus);
        assert_eq!(public.e().to_vec(), params.exponent);
    }

    #[test]
    fn test_incomplete_key_is_rejected() {
        let params = RsaParameters {
            inverse_q: Vec::new(),
            ..test_params()
        };
        assert_matches!(
            params.to_private_key(),
            Err(CryptoError::IncompleteKey("inverseQ"))
        );
    }

    #[test]
    fn test_json_layout() {
        let params = test_params();
        let json = serde_json::to_value(&params).unwrap();
        let object = json.as_object().unwrap();
        for key in ["d", "dp", "dq", "exponent", "inverseQ", "modulus", "p", "q"] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(object["exponent"], "AQAB");
        let decoded: RsaParameters = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_debug_does_not_leak_private_material() {
        let debug = format!("{:?}", test_params());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("inverse_q"));
    }
}
