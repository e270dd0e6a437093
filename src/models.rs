//! Trade record models consumed by the learned-behaviour engine
//!
//! Records (derivatives) are owned by the record store; the engine only reads
//! them as attribute snapshots plus their audit log of actions.

use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A modelled attribute of a derivative record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    BuyingParty,
    SellingParty,
    Asset,
    Quantity,
    StrikePrice,
    CurrencyCode,
    DateOfTrade,
    MaturityDate,
}

impl Attribute {
    pub const ALL: [Attribute; 8] = [
        Attribute::BuyingParty,
        Attribute::SellingParty,
        Attribute::Asset,
        Attribute::Quantity,
        Attribute::StrikePrice,
        Attribute::CurrencyCode,
        Attribute::DateOfTrade,
        Attribute::MaturityDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::BuyingParty => "buying_party",
            Attribute::SellingParty => "selling_party",
            Attribute::Asset => "asset",
            Attribute::Quantity => "quantity",
            Attribute::StrikePrice => "strike_price",
            Attribute::CurrencyCode => "currency_code",
            Attribute::DateOfTrade => "date_of_trade",
            Attribute::MaturityDate => "maturity_date",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Attribute::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| Error::NotFound(format!("attribute {}", s)))
    }
}

/// A single attribute value as it appears in snapshots and correction logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            AttrValue::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            AttrValue::Float(_) => None,
            AttrValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Attribute values of one derivative at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub id: i64,
    pub buying_party: String,
    pub selling_party: String,
    pub asset: String,
    pub quantity: i64,
    pub strike_price: f64,
    pub currency_code: String,
    pub date_of_trade: NaiveDate,
    pub maturity_date: NaiveDate,
}

impl Snapshot {
    pub fn get(&self, attribute: Attribute) -> AttrValue {
        match attribute {
            Attribute::BuyingParty => AttrValue::Text(self.buying_party.clone()),
            Attribute::SellingParty => AttrValue::Text(self.selling_party.clone()),
            Attribute::Asset => AttrValue::Text(self.asset.clone()),
            Attribute::Quantity => AttrValue::Int(self.quantity),
            Attribute::StrikePrice => AttrValue::Float(self.strike_price),
            Attribute::CurrencyCode => AttrValue::Text(self.currency_code.clone()),
            Attribute::DateOfTrade => {
                AttrValue::Text(self.date_of_trade.format(DATE_FORMAT).to_string())
            }
            Attribute::MaturityDate => {
                AttrValue::Text(self.maturity_date.format(DATE_FORMAT).to_string())
            }
        }
    }

    /// Overwrite one attribute, coercing the value to the attribute's type
    pub fn set(&mut self, attribute: Attribute, value: &AttrValue) -> Result<()> {
        let bad = || Error::MalformedLog(format!("value {:?} does not fit {}", value, attribute));
        match attribute {
            Attribute::BuyingParty => self.buying_party = value.to_string(),
            Attribute::SellingParty => self.selling_party = value.to_string(),
            Attribute::Asset => self.asset = value.to_string(),
            Attribute::CurrencyCode => self.currency_code = value.to_string(),
            Attribute::Quantity => self.quantity = value.as_i64().ok_or_else(bad)?,
            Attribute::StrikePrice => self.strike_price = value.as_f64().ok_or_else(bad)?,
            Attribute::DateOfTrade => {
                self.date_of_trade = NaiveDate::parse_from_str(&value.to_string(), DATE_FORMAT)
                    .map_err(|_| bad())?
            }
            Attribute::MaturityDate => {
                self.maturity_date = NaiveDate::parse_from_str(&value.to_string(), DATE_FORMAT)
                    .map_err(|_| bad())?
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Add,
    Update,
    Delete,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Add => "ADD",
            ActionType::Update => "UPDATE",
            ActionType::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADD" => Some(ActionType::Add),
            "UPDATE" => Some(ActionType::Update),
            "DELETE" => Some(ActionType::Delete),
            _ => None,
        }
    }
}

/// One recorded correction: `attribute` went from `old_value` to `new_value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub attribute: String,
    pub old_value: AttrValue,
    pub new_value: AttrValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UpdateLogShape {
    Many(Vec<UpdateEntry>),
    One(UpdateEntry),
}

/// Parse an action's update log, which is stored either as a single entry or a list
pub fn parse_update_log(json: &str) -> Result<Vec<UpdateEntry>> {
    let shape: UpdateLogShape = serde_json::from_str(json)?;
    Ok(match shape {
        UpdateLogShape::Many(entries) => entries,
        UpdateLogShape::One(entry) => vec![entry],
    })
}

/// An audit log entry attached to a derivative
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub derivative_id: i64,
    pub user_id: Option<i64>,
    pub action_type: ActionType,
    pub timestamp: NaiveDateTime,
    pub update_log: Vec<UpdateEntry>,
    /// Tree the action is attributed to, if it was taken in response to a flag
    pub tree_id: Option<i64>,
}

/// A derivative with its audit log, oldest action first
#[derive(Debug, Clone)]
pub struct DerivativeRecord {
    pub snapshot: Snapshot,
    pub actions: Vec<Action>,
}
