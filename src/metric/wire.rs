use super::Kind;
use crate::envelope::hash::Signer;
use crate::error::Error;

/// The serializable projection of a metric.
///
/// Exactly one of `delta` and `value` is populated: `value` for gauges,
/// `delta` for counters. `kind` is kept as text so an unknown type surfaces
/// as not-implemented rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMetric {
    /// Metric name.
    pub id: String,
    /// `gauge` or `counter`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Counter increment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// Gauge reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Hex HMAC over the canonical string, empty when signing is off.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
}

impl WireMetric {
    /// An unsigned gauge.
    pub fn gauge<S: Into<String>>(id: S, value: f64) -> WireMetric {
        WireMetric {
            id: id.into(),
            kind: Kind::Gauge.as_str().to_string(),
            delta: None,
            value: Some(value),
            hash: String::new(),
        }
    }

    /// An unsigned counter.
    pub fn counter<S: Into<String>>(id: S, delta: i64) -> WireMetric {
        WireMetric {
            id: id.into(),
            kind: Kind::Counter.as_str().to_string(),
            delta: Some(delta),
            value: None,
            hash: String::new(),
        }
    }

    /// A lookup request: name and type only.
    pub fn query<S: Into<String>>(id: S, kind: Kind) -> WireMetric {
        WireMetric {
            id: id.into(),
            kind: kind.as_str().to_string(),
            delta: None,
            value: None,
            hash: String::new(),
        }
    }

    /// The parsed kind, not-implemented when unknown.
    pub fn kind(&self) -> Result<Kind, Error> {
        self.kind.parse()
    }

    /// The string the hash is computed over: `<id>:<type>:<value-or-delta>`.
    ///
    /// Gauges render with six decimals, counters as plain integers.
    pub fn canonical(&self) -> Result<String, Error> {
        match self.kind()? {
            Kind::Gauge => match self.value {
                Some(v) => Ok(format!("{}:gauge:{:.6}", self.id, v)),
                None => Err(Error::BadRequest(format!("gauge {} has no value", self.id))),
            },
            Kind::Counter => match self.delta {
                Some(d) => Ok(format!("{}:counter:{}", self.id, d)),
                None => Err(Error::BadRequest(format!("counter {} has no delta", self.id))),
            },
        }
    }

    /// Fill in `hash`. A no-op with an empty key or an incomplete metric.
    pub fn sign(&mut self, signer: &Signer) {
        self.hash = match self.canonical() {
            Ok(canonical) => signer.sign(&canonical),
            Err(_) => String::new(),
        };
    }

    /// Check `hash` against `signer`.
    ///
    /// An empty incoming hash or an empty key always passes.
    pub fn verify(&self, signer: &Signer) -> Result<(), Error> {
        if self.hash.is_empty() || !signer.enabled() {
            return Ok(());
        }
        let canonical = self.canonical()?;
        if signer.verify(&canonical, &self.hash) {
            Ok(())
        } else {
            Err(Error::Authentication {
                id: self.id.clone(),
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canonical_strings() {
        assert_eq!(
            WireMetric::gauge("Alloc", 0.1).canonical().unwrap(),
            "Alloc:gauge:0.100000"
        );
        assert_eq!(
            WireMetric::counter("PollCount", 5).canonical().unwrap(),
            "PollCount:counter:5"
        );
    }

    #[test]
    fn json_shape() {
        let g = serde_json::to_string(&WireMetric::gauge("a", 1.5)).unwrap();
        assert_eq!(g, r#"{"id":"a","type":"gauge","value":1.5}"#);
        let c = serde_json::to_string(&WireMetric::counter("b", 2)).unwrap();
        assert_eq!(c, r#"{"id":"b","type":"counter","delta":2}"#);

        let parsed: WireMetric =
            serde_json::from_str(r#"{"id":"x","type":"weird","value":1}"#).unwrap();
        assert!(parsed.kind().is_err());
    }

    #[test]
    fn signature_checks() {
        let signer = Signer::new("secret");
        let other = Signer::new("other");
        let open = Signer::new("");

        let mut m = WireMetric::counter("PollCount", 3);
        m.sign(&signer);
        assert!(!m.hash.is_empty());
        assert!(m.verify(&signer).is_ok());
        match m.verify(&other) {
            Err(Error::Authentication { id }) => assert_eq!(id, "PollCount"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(m.verify(&open).is_ok());

        let mut unsigned = WireMetric::gauge("g", 1.0);
        unsigned.sign(&open);
        assert!(unsigned.hash.is_empty());
        assert!(unsigned.verify(&signer).is_ok());
    }
}
