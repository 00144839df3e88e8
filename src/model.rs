//! # Data Model
//!
//! Strongly-typed versions of the pipeline's inputs: dimension interval records,
//! tracked attribute values, and transaction events.

use crate::error::{PipelineError, RecordKind};
use crate::temporal::{format_day, parse_day, EndDates, ValidTo, Validity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use time::Date;

/// Column names of the dimension table.
pub mod columns {
    pub const SURROGATE_ID: &str = "sk_agrmnt_id";
    pub const ENTITY_ID: &str = "agrmnt_id";
    pub const VALID_FROM: &str = "actual_from_dt";
    pub const VALID_TO: &str = "actual_to_dt";
    pub const GROUP_KEY: &str = "client_id";
}

/// Identifier of one physical record version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurrogateId(pub u64);

impl fmt::Display for SurrogateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SK{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// The logical entity a chain of versions describes (e.g. an agreement)
    EntityId
);
string_id!(
    /// Foreign key used to find an entity's versions during a join (e.g. a client)
    GroupKey
);
string_id!(UserId);
string_id!(TransactionId);

/// Value type of a tracked attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttrKind {
    Integer,
    Decimal,
    Text,
}

/// One tracked attribute column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: AttrKind,
    /// Fixed number of decimal places for `decimal` attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

impl AttributeSpec {
    pub fn integer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AttrKind::Integer,
            scale: None,
        }
    }

    pub fn decimal(name: &str, scale: u32) -> Self {
        Self {
            name: name.to_string(),
            kind: AttrKind::Decimal,
            scale: Some(scale),
        }
    }

    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AttrKind::Text,
            scale: None,
        }
    }

    /// Parse a raw value. Decimals are rescaled so `4.0` and `4.00` become the same value.
    pub fn parse(&self, raw: &str) -> Result<AttrValue, String> {
        let raw = raw.trim();
        match self.kind {
            AttrKind::Integer => raw
                .parse::<i64>()
                .map(AttrValue::Integer)
                .map_err(|err| err.to_string()),
            AttrKind::Decimal => {
                let mut value = Decimal::from_str(raw).map_err(|err| err.to_string())?;
                value.rescale(self.scale.unwrap_or(crate::config::DEFAULT_DECIMAL_SCALE));
                Ok(AttrValue::Decimal(value))
            }
            AttrKind::Text => Ok(AttrValue::Text(raw.to_string())),
        }
    }
}

/// Ordered list of attributes whose equality decides whether adjacent versions are redundant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub attributes: Vec<AttributeSpec>,
    /// How the dimension file stores `valid_to` of closed versions
    #[serde(default)]
    pub end_dates: EndDates,
}

impl Default for AttributeSchema {
    fn default() -> Self {
        Self::new(vec![
            AttributeSpec::integer("product_id"),
            AttributeSpec::decimal("interest_rate", crate::config::DEFAULT_DECIMAL_SCALE),
        ])
    }
}

impl AttributeSchema {
    pub fn new(attributes: Vec<AttributeSpec>) -> Self {
        Self {
            attributes,
            end_dates: EndDates::default(),
        }
    }

    pub fn with_end_dates(mut self, end_dates: EndDates) -> Self {
        self.end_dates = end_dates;
        self
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|spec| spec.name.as_str())
    }

    /// Parse one value per attribute from `lookup`, reporting the first failure as
    /// `(field, value, reason)`.
    pub fn parse_with<'a, F>(&self, lookup: F) -> Result<TrackedAttributes, (String, String, String)>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let mut values = Vec::with_capacity(self.attributes.len());
        for spec in &self.attributes {
            let Some(raw) = lookup(&spec.name) else {
                return Err((spec.name.clone(), String::new(), "missing column".to_string()));
            };
            let value = spec
                .parse(raw)
                .map_err(|reason| (spec.name.clone(), raw.to_string(), reason))?;
            values.push(value);
        }
        Ok(TrackedAttributes(values))
    }
}

/// A single tracked attribute value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttrValue {
    Integer(i64),
    Decimal(Decimal),
    Text(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Integer(value) => write!(f, "{value}"),
            AttrValue::Decimal(value) => write!(f, "{value}"),
            AttrValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Integer(value)
    }
}

impl From<Decimal> for AttrValue {
    fn from(value: Decimal) -> Self {
        AttrValue::Decimal(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

/// The ordered tuple of tracked attribute values of one version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TrackedAttributes(pub Vec<AttrValue>);

impl TrackedAttributes {
    pub fn new(values: Vec<AttrValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[AttrValue] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&AttrValue> {
        self.0.get(index)
    }
}

impl fmt::Display for TrackedAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

/// One version of an entity's attributes, valid over a date interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalRecord {
    pub surrogate_id: SurrogateId,
    pub entity_id: EntityId,
    pub validity: Validity,
    pub group_key: GroupKey,
    pub attributes: TrackedAttributes,
}

impl IntervalRecord {
    pub fn new(
        surrogate_id: SurrogateId,
        entity_id: EntityId,
        validity: Validity,
        group_key: GroupKey,
        attributes: TrackedAttributes,
    ) -> Self {
        Self {
            surrogate_id,
            entity_id,
            validity,
            group_key,
            attributes,
        }
    }

    pub fn valid_from(&self) -> Date {
        self.validity.from
    }

    pub fn valid_to(&self) -> ValidTo {
        self.validity.to
    }

    /// Build a record from a dimension table row keyed by column name.
    pub fn from_row(
        row: &HashMap<String, String>,
        schema: &AttributeSchema,
    ) -> Result<Self, PipelineError> {
        let raw_sk = row
            .get(columns::SURROGATE_ID)
            .map(|value| value.trim())
            .unwrap_or_default();
        let malformed = |field: &str, value: &str, reason: &dyn fmt::Display| {
            PipelineError::malformed(RecordKind::Interval, raw_sk, field, value, reason)
        };
        let field = |name: &str| -> Result<&str, PipelineError> {
            match row.get(name).map(|value| value.trim()) {
                Some(value) if !value.is_empty() => Ok(value),
                Some(value) => Err(malformed(name, value, &"empty value")),
                None => Err(malformed(name, "", &"missing column")),
            }
        };

        let surrogate_id = field(columns::SURROGATE_ID)?
            .parse::<u64>()
            .map(SurrogateId)
            .map_err(|err| malformed(columns::SURROGATE_ID, raw_sk, &err))?;
        let entity_id = EntityId::from(field(columns::ENTITY_ID)?);
        let group_key = GroupKey::from(field(columns::GROUP_KEY)?);

        let raw_from = field(columns::VALID_FROM)?;
        let from = parse_day(raw_from).map_err(|err| malformed(columns::VALID_FROM, raw_from, &err))?;
        let raw_to = field(columns::VALID_TO)?;
        let to = ValidTo::parse(raw_to).map_err(|err| malformed(columns::VALID_TO, raw_to, &err))?;
        let validity = Validity::from_stored(from, to, schema.end_dates)
            .map_err(|err| malformed(columns::VALID_TO, raw_to, &err))?;

        let attributes = schema
            .parse_with(|name| row.get(name).map(String::as_str))
            .map_err(|(field, value, reason)| malformed(&field, &value, &reason))?;

        Ok(Self {
            surrogate_id,
            entity_id,
            validity,
            group_key,
            attributes,
        })
    }
}

impl fmt::Display for IntervalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} group={} {}",
            self.surrogate_id, self.entity_id, self.validity, self.group_key, self.attributes
        )
    }
}

/// Parse a boolean flag written as `true`/`false` or `1`/`0`, case-insensitively.
pub fn parse_flag(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("true") || raw == "1" {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") || raw == "0" {
        Some(false)
    } else {
        None
    }
}

/// A transaction as it arrives from the source, all fields unparsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub transaction_id: String,
    pub date: String,
    pub user_id: String,
    pub is_blocked: String,
    pub transaction_amount: String,
    pub transaction_category_id: String,
    /// Overrides `user_id` as the join group key when present
    #[serde(default)]
    pub client_id: Option<String>,
}

impl RawTransaction {
    /// Parse into a typed event, naming the transaction and field on failure.
    pub fn parse(self) -> Result<TransactionEvent, PipelineError> {
        let id = self.transaction_id.trim().to_string();
        let malformed = |field: &str, value: &str, reason: &dyn fmt::Display| {
            PipelineError::malformed(RecordKind::Transaction, id.as_str(), field, value, reason)
        };

        if id.is_empty() {
            return Err(malformed("transaction_id", "", &"empty value"));
        }
        let occurred_on = parse_day(&self.date).map_err(|err| malformed("date", &self.date, &err))?;
        let is_blocked = parse_flag(&self.is_blocked)
            .ok_or_else(|| malformed("is_blocked", &self.is_blocked, &"expected a boolean"))?;
        let amount = Decimal::from_str(self.transaction_amount.trim())
            .map_err(|err| malformed("transaction_amount", &self.transaction_amount, &err))?;
        let category_id = self
            .transaction_category_id
            .trim()
            .parse::<u32>()
            .map_err(|err| {
                malformed(
                    "transaction_category_id",
                    &self.transaction_category_id,
                    &err,
                )
            })?;
        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            return Err(malformed("user_id", "", &"empty value"));
        }
        let group_key = match self.client_id.as_deref().map(str::trim) {
            Some(client) if !client.is_empty() => GroupKey::from(client),
            _ => GroupKey::from(user_id),
        };

        Ok(TransactionEvent {
            transaction_id: TransactionId(id.clone()),
            occurred_on,
            user_id: UserId::from(user_id),
            group_key,
            is_blocked,
            amount,
            category_id,
        })
    }
}

/// A parsed transaction event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEvent {
    pub transaction_id: TransactionId,
    pub occurred_on: Date,
    pub user_id: UserId,
    pub group_key: GroupKey,
    pub is_blocked: bool,
    pub amount: Decimal,
    pub category_id: u32,
}

impl TransactionEvent {
    /// The unparsed form, as written back to a transactions file.
    pub fn to_raw(&self) -> RawTransaction {
        RawTransaction {
            transaction_id: self.transaction_id.to_string(),
            date: format_day(self.occurred_on),
            user_id: self.user_id.to_string(),
            is_blocked: if self.is_blocked { "True" } else { "False" }.to_string(),
            transaction_amount: self.amount.to_string(),
            transaction_category_id: self.category_id.to_string(),
            client_id: (self.group_key.as_str() != self.user_id.as_str())
                .then(|| self.group_key.to_string()),
        }
    }
}
