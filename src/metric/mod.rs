//! The metric value model.
//!
//! There are exactly two kinds of metric. A `Gauge` is a point-in-time
//! reading where the latest write replaces the prior one. A `Counter`
//! accumulates every write it receives and only resets when its store is
//! recreated.

use crate::envelope::hash::Signer;
use crate::error::Error;
use std::fmt;
use std::str::FromStr;

mod wire;

pub use self::wire::WireMetric;

/// The kind of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Latest write wins.
    Gauge,
    /// Writes add.
    Counter,
}

impl Kind {
    /// The wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match *self {
            Kind::Gauge => "gauge",
            Kind::Counter => "counter",
        }
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Kind, Error> {
        match s {
            "gauge" => Ok(Kind::Gauge),
            "counter" => Ok(Kind::Counter),
            other => Err(Error::NotImplemented(other.to_string())),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored metric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// A gauge reading.
    Gauge(f64),
    /// A counter total.
    Counter(i64),
}

impl Value {
    /// The empty value of the given kind.
    pub fn zero(kind: Kind) -> Value {
        match kind {
            Kind::Gauge => Value::Gauge(0.0),
            Kind::Counter => Value::Counter(0),
        }
    }

    /// The kind of this value.
    pub fn kind(&self) -> Kind {
        match *self {
            Value::Gauge(_) => Kind::Gauge,
            Value::Counter(_) => Kind::Counter,
        }
    }

    /// Apply a wire metric: gauges replace, counters accumulate.
    ///
    /// The wire metric must be of the same kind as `self` and carry the
    /// field that kind reads, `value` for gauges and `delta` for counters.
    pub fn set(&mut self, wire: &WireMetric) -> Result<(), Error> {
        let incoming = wire.kind()?;
        if incoming != self.kind() {
            return Err(Error::BadRequest(format!(
                "metric {} is a {}, not a {}",
                wire.id,
                self.kind(),
                incoming
            )));
        }
        match *self {
            Value::Gauge(ref mut v) => match wire.value {
                Some(incoming) if incoming.is_finite() => {
                    *v = incoming;
                    Ok(())
                }
                Some(incoming) => Err(Error::BadRequest(format!(
                    "gauge {} has non-finite value {}",
                    wire.id, incoming
                ))),
                None => Err(Error::BadRequest(format!("gauge {} has no value", wire.id))),
            },
            Value::Counter(ref mut total) => match wire.delta {
                Some(delta) => match total.checked_add(delta) {
                    Some(sum) => {
                        *total = sum;
                        Ok(())
                    }
                    None => Err(Error::BadRequest(format!("counter {} overflows", wire.id))),
                },
                None => Err(Error::BadRequest(format!("counter {} has no delta", wire.id))),
            },
        }
    }

    /// Apply a textual value, as carried in a URL path.
    ///
    /// Returns false and leaves `self` untouched if `text` does not parse.
    pub fn set_from_text(&mut self, text: &str) -> bool {
        match *self {
            Value::Gauge(ref mut v) => match text.parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => {
                    *v = parsed;
                    true
                }
                _ => false,
            },
            Value::Counter(ref mut total) => {
                match text.parse::<i64>().ok().and_then(|d| total.checked_add(d)) {
                    Some(sum) => {
                        *total = sum;
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Project into a signed wire metric.
    pub fn to_wire(&self, id: &str, signer: &Signer) -> WireMetric {
        let mut wire = match *self {
            Value::Gauge(v) => WireMetric::gauge(id, v),
            Value::Counter(d) => WireMetric::counter(id, d),
        };
        wire.sign(signer);
        wire
    }
}

/// Shortest round-trip rendering of a gauge, switching to exponent form
/// (`1e+06`, `1.5e-07`) when the decimal exponent is below -4 or at least 6.
fn format_gauge(v: f64) -> String {
    if v == 0.0 || !v.is_finite() {
        return format!("{}", v);
    }
    let sci = format!("{:e}", v);
    let (mantissa, exp) = match sci.find('e') {
        Some(idx) => (&sci[..idx], &sci[idx + 1..]),
        None => return format!("{}", v),
    };
    let exp: i32 = match exp.parse() {
        Ok(exp) => exp,
        Err(_) => return format!("{}", v),
    };
    if exp < -4 || exp >= 6 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        format!("{}", v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Gauge(v) => f.write_str(&format_gauge(v)),
            Value::Counter(d) => write!(f, "{}", d),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::{QuickCheck, TestResult};

    #[test]
    fn kind_parsing() {
        assert_eq!("gauge".parse::<Kind>().unwrap(), Kind::Gauge);
        assert_eq!("counter".parse::<Kind>().unwrap(), Kind::Counter);
        match "notcounter".parse::<Kind>() {
            Err(Error::NotImplemented(k)) => assert_eq!(k, "notcounter"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn gauge_replaces() {
        fn inner(a: f64, b: f64) -> TestResult {
            if !a.is_finite() || !b.is_finite() {
                return TestResult::discard();
            }
            let mut v = Value::zero(Kind::Gauge);
            v.set(&WireMetric::gauge("g", a)).unwrap();
            v.set(&WireMetric::gauge("g", b)).unwrap();
            TestResult::from_bool(v == Value::Gauge(b))
        }
        QuickCheck::new()
            .tests(1000)
            .quickcheck(inner as fn(f64, f64) -> TestResult);
    }

    #[test]
    fn counter_accumulates() {
        fn inner(deltas: Vec<i32>) -> TestResult {
            let mut v = Value::zero(Kind::Counter);
            let mut expected: i64 = 0;
            for d in deltas {
                expected += i64::from(d);
                v.set(&WireMetric::counter("c", i64::from(d))).unwrap();
            }
            TestResult::from_bool(v == Value::Counter(expected))
        }
        QuickCheck::new()
            .tests(1000)
            .quickcheck(inner as fn(Vec<i32>) -> TestResult);
    }

    #[test]
    fn set_from_text_rejects_garbage() {
        let mut g = Value::Gauge(1.5);
        assert!(!g.set_from_text("abc"));
        assert!(!g.set_from_text("NaN"));
        assert_eq!(g, Value::Gauge(1.5));

        let mut c = Value::Counter(3);
        assert!(!c.set_from_text("abc"));
        assert!(!c.set_from_text("1.5"));
        assert_eq!(c, Value::Counter(3));
        assert!(c.set_from_text("4"));
        assert_eq!(c, Value::Counter(7));
    }

    #[test]
    fn set_rejects_kind_mismatch_and_missing_fields() {
        let mut g = Value::Gauge(1.0);
        assert!(g.set(&WireMetric::counter("g", 1)).is_err());
        let mut bare = WireMetric::gauge("g", 2.0);
        bare.value = None;
        assert!(g.set(&bare).is_err());
        assert_eq!(g, Value::Gauge(1.0));
    }

    #[test]
    fn display_is_plain() {
        assert_eq!(Value::Gauge(0.1).to_string(), "0.1");
        assert_eq!(Value::Counter(10).to_string(), "10");
    }

    #[test]
    fn large_and_small_gauges_use_exponents() {
        assert_eq!(Value::Gauge(123456.0).to_string(), "123456");
        assert_eq!(Value::Gauge(1e6).to_string(), "1e+06");
        assert_eq!(Value::Gauge(1e21).to_string(), "1e+21");
        assert_eq!(Value::Gauge(1234567.5).to_string(), "1.2345675e+06");
        assert_eq!(Value::Gauge(-2.5e-7).to_string(), "-2.5e-07");
        assert_eq!(Value::Gauge(0.0001).to_string(), "0.0001");
        assert_eq!(Value::Gauge(0.0).to_string(), "0");
        assert_eq!(Value::Gauge(1e100).to_string(), "1e+100");
    }

    #[test]
    fn rendered_gauges_parse_back() {
        fn inner(v: f64) -> TestResult {
            if !v.is_finite() {
                return TestResult::discard();
            }
            let mut g = Value::zero(Kind::Gauge);
            TestResult::from_bool(g.set_from_text(&Value::Gauge(v).to_string()) && g == Value::Gauge(v))
        }
        QuickCheck::new()
            .tests(1000)
            .quickcheck(inner as fn(f64) -> TestResult);
    }
}
