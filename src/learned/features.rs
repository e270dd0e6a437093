//! Features, labels and split criteria

use crate::error::{Error, Result};
use crate::models::{AttrValue, Attribute, Snapshot};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute of a record that a tree node tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    BuyingParty,
    SellingParty,
    Asset,
    Quantity,
    StrikePrice,
}

impl Feature {
    pub fn attribute(&self) -> Attribute {
        match self {
            Feature::BuyingParty => Attribute::BuyingParty,
            Feature::SellingParty => Attribute::SellingParty,
            Feature::Asset => Attribute::Asset,
            Feature::Quantity => Attribute::Quantity,
            Feature::StrikePrice => Attribute::StrikePrice,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.attribute().as_str()
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buying_party" => Some(Feature::BuyingParty),
            "selling_party" => Some(Feature::SellingParty),
            "asset" => Some(Feature::Asset),
            "quantity" => Some(Feature::Quantity),
            "strike_price" => Some(Feature::StrikePrice),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Feature::Quantity | Feature::StrikePrice)
    }

    /// Numeric value of this feature, for the statistical buckets
    pub fn numeric_value(&self, snapshot: &Snapshot) -> f64 {
        match self {
            Feature::Quantity => snapshot.quantity as f64,
            Feature::StrikePrice => snapshot.strike_price,
            _ => f64::NAN,
        }
    }

    /// Text value of this feature, for the equality tests
    pub fn text_value<'a>(&self, snapshot: &'a Snapshot) -> &'a str {
        match self {
            Feature::BuyingParty => &snapshot.buying_party,
            Feature::SellingParty => &snapshot.selling_party,
            Feature::Asset => &snapshot.asset,
            _ => "",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Valid,
    Erroneous,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Valid => "VALID",
            Label::Erroneous => "ERRONEOUS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VALID" => Some(Label::Valid),
            "ERRONEOUS" => Some(Label::Erroneous),
            _ => None,
        }
    }
}

/// Statistical bucket of a numeric feature, relative to the VALID mean and std
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    LessThanMean,
    MoreThanMean,
    ZeroToOneStd,
    OneToTwoStd,
    TwoToThreeStd,
    ThreeToInfStd,
}

impl Bucket {
    pub const ALL: [Bucket; 6] = [
        Bucket::LessThanMean,
        Bucket::MoreThanMean,
        Bucket::ZeroToOneStd,
        Bucket::OneToTwoStd,
        Bucket::TwoToThreeStd,
        Bucket::ThreeToInfStd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::LessThanMean => "less_than_mean",
            Bucket::MoreThanMean => "more_than_mean",
            Bucket::ZeroToOneStd => "0_to_1_std",
            Bucket::OneToTwoStd => "1_to_2_std",
            Bucket::TwoToThreeStd => "2_to_3_std",
            Bucket::ThreeToInfStd => "3_to_inf_std",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Bucket::ALL.iter().copied().find(|b| b.as_str() == s)
    }

    pub fn contains(&self, value: f64, mean: f64, std: f64) -> bool {
        let deviation = (value - mean).abs();
        match self {
            Bucket::LessThanMean => value < mean,
            Bucket::MoreThanMean => value > mean,
            Bucket::ZeroToOneStd => deviation <= std,
            Bucket::OneToTwoStd => std < deviation && deviation <= 2.0 * std,
            Bucket::TwoToThreeStd => 2.0 * std < deviation && deviation <= 3.0 * std,
            Bucket::ThreeToInfStd => deviation > 3.0 * std,
        }
    }
}

/// The test a node applies to its feature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criterion {
    Equals(String),
    Bucket(Bucket),
}

impl Criterion {
    /// Rebuild a criterion from its persisted string form
    pub fn parse(feature: Feature, criteria: &str) -> Result<Self> {
        if feature.is_numeric() {
            Bucket::parse(criteria)
                .map(Criterion::Bucket)
                .ok_or_else(|| Error::MalformedTree(format!("bucket {} for {}", criteria, feature)))
        } else {
            Ok(Criterion::Equals(criteria.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Criterion::Equals(key) => key,
            Criterion::Bucket(bucket) => bucket.as_str(),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A labelled snapshot produced by the training set compiler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingExample {
    pub label: Label,
    pub snapshot: Snapshot,
    /// Attribute that was later corrected (ERRONEOUS only)
    pub erroneous_field: Option<Attribute>,
    /// Value the attribute was corrected to (ERRONEOUS only)
    pub correction: Option<AttrValue>,
}

impl TrainingExample {
    pub fn valid(snapshot: Snapshot) -> Self {
        Self {
            label: Label::Valid,
            snapshot,
            erroneous_field: None,
            correction: None,
        }
    }

    pub fn erroneous(snapshot: Snapshot, field: Attribute, correction: AttrValue) -> Self {
        Self {
            label: Label::Erroneous,
            snapshot,
            erroneous_field: Some(field),
            correction: Some(correction),
        }
    }
}

/// Anything a node can be evaluated against: a snapshot plus an optional known label
pub trait Example {
    fn snapshot(&self) -> &Snapshot;
    fn label(&self) -> Option<Label>;
}

impl Example for TrainingExample {
    fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn label(&self) -> Option<Label> {
        Some(self.label)
    }
}

impl Example for Snapshot {
    fn snapshot(&self) -> &Snapshot {
        self
    }

    fn label(&self) -> Option<Label> {
        None
    }
}
