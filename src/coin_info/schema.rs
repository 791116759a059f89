//! Coin-info schema validation
//!
//! A pure-function rendering of the published JSON Schema for
//! "application/vnd.swaptacular.coin-info+json". Violations carry
//! ajv-style instance paths and messages, so errors read the same way
//! the reference tooling reports them ("/peg/display/decimalPlaces
//! must be integer").

use serde_json::{Map, Value};

/// One schema violation; `path` is "" for root-level problems
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Validate a candidate coin-info document.
///
/// Returns every violation found, in schema order; an empty list means
/// the document is valid. Unknown extra properties are ignored.
pub fn validate(candidate: &Value) -> Vec<Violation> {
    let mut out = Vec::new();

    let obj = match candidate.as_object() {
        Some(obj) => obj,
        None => {
            out.push(Violation::new("", "must be object"));
            return out;
        }
    };

    check_versioned_type(obj, "", "CoinInfo", &mut out);
    check_integer(obj, "", "revision", 0, 9_007_199_254_740_991, true, &mut out);
    check_string(obj, "", "willNotChangeUntil", None, None, false, &mut out);
    check_resource_ref(obj, "", "latestDebtorInfo", true, &mut out);
    check_string(obj, "", "summary", None, Some(500), false, &mut out);
    check_debtor_identity(obj, "", &mut out);
    check_string(obj, "", "debtorName", Some(1), Some(40), true, &mut out);
    check_resource_ref(obj, "", "debtorHomepage", false, &mut out);
    check_number(obj, "", "amountDivisor", Bound::ExclusiveMin(0.0), true, &mut out);
    check_integer(obj, "", "decimalPlaces", -20, 20, true, &mut out);
    check_string(obj, "", "unit", Some(1), Some(40), true, &mut out);
    check_peg(obj, &mut out);

    if let Some(localization) = obj.get("localization") {
        if !localization.is_object() {
            out.push(Violation::new("/localization", "must be object"));
        }
    }

    out
}

enum Bound {
    Min(f64),
    ExclusiveMin(f64),
}

fn join(prefix: &str, key: &str) -> String {
    format!("{}/{}", prefix, key)
}

fn missing(prefix: &str, key: &str) -> Violation {
    Violation::new(prefix, format!("must have required property '{}'", key))
}

/// `^Base(-v[1-9][0-9]*)?$`
fn matches_versioned_type(value: &str, base: &str) -> bool {
    match value.strip_prefix(base) {
        Some("") => true,
        Some(rest) => match rest.strip_prefix("-v") {
            Some(digits) => {
                !digits.is_empty()
                    && !digits.starts_with('0')
                    && digits.bytes().all(|b| b.is_ascii_digit())
            }
            None => false,
        },
        None => false,
    }
}

fn check_versioned_type(obj: &Map<String, Value>, prefix: &str, base: &str, out: &mut Vec<Violation>) {
    let path = join(prefix, "type");
    match obj.get("type") {
        None => out.push(missing(prefix, "type")),
        Some(value) => match value.as_str() {
            None => out.push(Violation::new(path, "must be string")),
            Some(s) if !matches_versioned_type(s, base) => out.push(Violation::new(
                path,
                format!("must match pattern \"^{}(-v[1-9][0-9]*)?$\"", base),
            )),
            Some(_) => {}
        },
    }
}

fn check_string(
    obj: &Map<String, Value>,
    prefix: &str,
    key: &str,
    min_len: Option<usize>,
    max_len: Option<usize>,
    required: bool,
    out: &mut Vec<Violation>,
) {
    let value = match obj.get(key) {
        Some(value) => value,
        None => {
            if required {
                out.push(missing(prefix, key));
            }
            return;
        }
    };
    let path = join(prefix, key);
    match value.as_str() {
        None => out.push(Violation::new(path, "must be string")),
        Some(s) => {
            let len = s.chars().count();
            if let Some(min) = min_len {
                if len < min {
                    out.push(Violation::new(
                        path.clone(),
                        format!("must NOT have fewer than {} characters", min),
                    ));
                }
            }
            if let Some(max) = max_len {
                if len > max {
                    out.push(Violation::new(
                        path,
                        format!("must NOT have more than {} characters", max),
                    ));
                }
            }
        }
    }
}

fn check_number(
    obj: &Map<String, Value>,
    prefix: &str,
    key: &str,
    bound: Bound,
    required: bool,
    out: &mut Vec<Violation>,
) {
    let value = match obj.get(key) {
        Some(value) => value,
        None => {
            if required {
                out.push(missing(prefix, key));
            }
            return;
        }
    };
    let path = join(prefix, key);
    match value.as_f64() {
        None => out.push(Violation::new(path, "must be number")),
        Some(n) => match bound {
            Bound::Min(min) if n < min => {
                out.push(Violation::new(path, format!("must be >= {}", min)))
            }
            Bound::ExclusiveMin(min) if n <= min => {
                out.push(Violation::new(path, format!("must be > {}", min)))
            }
            _ => {}
        },
    }
}

fn check_integer(
    obj: &Map<String, Value>,
    prefix: &str,
    key: &str,
    min: i64,
    max: i64,
    required: bool,
    out: &mut Vec<Violation>,
) {
    let value = match obj.get(key) {
        Some(value) => value,
        None => {
            if required {
                out.push(missing(prefix, key));
            }
            return;
        }
    };
    let path = join(prefix, key);
    match value.as_f64() {
        None => out.push(Violation::new(path, "must be integer")),
        Some(n) if n.fract() != 0.0 => out.push(Violation::new(path, "must be integer")),
        Some(n) => {
            if n < min as f64 {
                out.push(Violation::new(path, format!("must be >= {}", min)));
            } else if n > max as f64 {
                out.push(Violation::new(path, format!("must be <= {}", max)));
            }
        }
    }
}

/// `{ uri: string }` with the uri capped at 200 characters
fn check_resource_ref(
    obj: &Map<String, Value>,
    prefix: &str,
    key: &str,
    required: bool,
    out: &mut Vec<Violation>,
) {
    let value = match obj.get(key) {
        Some(value) => value,
        None => {
            if required {
                out.push(missing(prefix, key));
            }
            return;
        }
    };
    let path = join(prefix, key);
    match value.as_object() {
        None => out.push(Violation::new(path, "must be object")),
        Some(inner) => check_string(inner, &path, "uri", None, Some(200), true, out),
    }
}

/// `{ type: DebtorIdentity, uri: string }` with the uri capped at 100
/// characters
fn check_debtor_identity(obj: &Map<String, Value>, prefix: &str, out: &mut Vec<Violation>) {
    let path = join(prefix, "debtorIdentity");
    match obj.get("debtorIdentity") {
        None => out.push(missing(prefix, "debtorIdentity")),
        Some(value) => match value.as_object() {
            None => out.push(Violation::new(path, "must be object")),
            Some(inner) => {
                check_versioned_type(inner, &path, "DebtorIdentity", out);
                check_string(inner, &path, "uri", None, Some(100), true, out);
            }
        },
    }
}

fn check_peg(obj: &Map<String, Value>, out: &mut Vec<Violation>) {
    let value = match obj.get("peg") {
        Some(value) => value,
        None => return,
    };
    let peg = match value.as_object() {
        None => {
            out.push(Violation::new("/peg", "must be object"));
            return;
        }
        Some(peg) => peg,
    };

    check_versioned_type(peg, "/peg", "Peg", out);
    check_number(peg, "/peg", "exchangeRate", Bound::Min(0.0), true, out);
    check_debtor_identity(peg, "/peg", out);
    check_resource_ref(peg, "/peg", "latestDebtorInfo", true, out);

    match peg.get("display") {
        None => out.push(missing("/peg", "display")),
        Some(value) => match value.as_object() {
            None => out.push(Violation::new("/peg/display", "must be object")),
            Some(display) => {
                check_versioned_type(display, "/peg/display", "PegDisplay", out);
                check_number(
                    display,
                    "/peg/display",
                    "amountDivisor",
                    Bound::ExclusiveMin(0.0),
                    true,
                    out,
                );
                check_integer(display, "/peg/display", "decimalPlaces", -20, 20, true, out);
                check_string(display, "/peg/display", "unit", Some(1), Some(40), true, out);
            }
        },
    }
}
