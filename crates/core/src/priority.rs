#![forbid(unsafe_code)]

use serde_json::Value;

pub const MIN_PRIORITY_VALUE: i64 = 0;
pub const MAX_PRIORITY_VALUE: i64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriorityBand {
    P0,
    P1,
    P2,
    P3,
}

impl PriorityBand {
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityBand::P0 => "P0",
            PriorityBand::P1 => "P1",
            PriorityBand::P2 => "P2",
            PriorityBand::P3 => "P3",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "P0" | "CRITICAL" | "TOP" | "URGENT" => Some(Self::P0),
            "P1" | "HIGH" => Some(Self::P1),
            "P2" | "MEDIUM" | "NORMAL" => Some(Self::P2),
            "P3" | "LOW" => Some(Self::P3),
            _ => None,
        }
    }

    /// The value written to work items when a band token is requested.
    pub fn representative_value(self) -> i64 {
        match self {
            PriorityBand::P0 => 100,
            PriorityBand::P1 => 75,
            PriorityBand::P2 => 50,
            PriorityBand::P3 => 25,
        }
    }

    pub fn for_value(value: i64) -> Self {
        if value >= 90 {
            PriorityBand::P0
        } else if value >= 70 {
            PriorityBand::P1
        } else if value >= 40 {
            PriorityBand::P2
        } else {
            PriorityBand::P3
        }
    }

    pub fn is_top_two(self) -> bool {
        matches!(self, PriorityBand::P0 | PriorityBand::P1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriorityTarget {
    Band(PriorityBand),
    Value(i64),
}

impl PriorityTarget {
    pub fn parse(raw: &Value) -> Result<Self, String> {
        match raw {
            Value::String(token) => {
                let token = token.trim();
                if let Some(band) = PriorityBand::parse(token) {
                    return Ok(Self::Band(band));
                }
                match token.parse::<i64>() {
                    Ok(value) => Self::from_value(value),
                    Err(_) => Err(format!(
                        "priority {token:?} is not a band (P0..P3, critical, high, medium, low) or a number"
                    )),
                }
            }
            Value::Number(number) => match number.as_i64() {
                Some(value) => Self::from_value(value),
                None => Err("priority must be an integer".to_string()),
            },
            _ => Err("priority must be a band token or an integer".to_string()),
        }
    }

    fn from_value(value: i64) -> Result<Self, String> {
        if !(MIN_PRIORITY_VALUE..=MAX_PRIORITY_VALUE).contains(&value) {
            return Err(format!(
                "priority must be within {MIN_PRIORITY_VALUE}..={MAX_PRIORITY_VALUE}"
            ));
        }
        Ok(Self::Value(value))
    }

    pub fn band(self) -> PriorityBand {
        match self {
            PriorityTarget::Band(band) => band,
            PriorityTarget::Value(value) => PriorityBand::for_value(value),
        }
    }

    pub fn numeric(self) -> i64 {
        match self {
            PriorityTarget::Band(band) => band.representative_value(),
            PriorityTarget::Value(value) => value,
        }
    }

    pub fn to_json(self) -> Value {
        match self {
            PriorityTarget::Band(band) => Value::String(band.as_str().to_string()),
            PriorityTarget::Value(value) => Value::from(value),
        }
    }
}
