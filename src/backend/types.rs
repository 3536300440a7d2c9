//! Domain types for the vector store backend

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance function of a collection. Fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceFunction {
    Cosine,
    Euclidean,
    InnerProduct,
}

impl fmt::Display for DistanceFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceFunction::Cosine => write!(f, "Cosine"),
            DistanceFunction::Euclidean => write!(f, "Euclidean"),
            DistanceFunction::InnerProduct => write!(f, "InnerProduct"),
        }
    }
}

impl FromStr for DistanceFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceFunction::Cosine),
            "euclidean" => Ok(DistanceFunction::Euclidean),
            "innerproduct" | "inner_product" | "dot" => Ok(DistanceFunction::InnerProduct),
            _ => Err(format!("unknown distance function: {}", s)),
        }
    }
}

/// The replicated definition of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: i32,
    pub distance: DistanceFunction,
    pub payload_table_schema: String,
}
