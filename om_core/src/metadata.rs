//! Metadata document stored at the end of current-generation files.
//!
//! The document is a tree of [`Variable`]s serialized as JSON. Each node may
//! carry an array descriptor, a scalar attribute, or nothing (a group).

use serde::{Deserialize, Serialize};

use crate::format::{CompressionKind, DataType};

/// JSON has no spelling for NaN or infinities, so those are stored as the
/// strings `"NaN"`, `"inf"` and `"-inf"`. Finite values stay plain numbers.
mod json_float {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::de::{self, DeserializeOwned};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub trait Float: Copy + Display + FromStr + Serialize + DeserializeOwned {
        fn finite(self) -> bool;
    }

    impl Float for f32 {
        fn finite(self) -> bool {
            self.is_finite()
        }
    }

    impl Float for f64 {
        fn finite(self) -> bool {
            self.is_finite()
        }
    }

    pub fn serialize<T: Float, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        if value.finite() {
            value.serialize(serializer)
        } else {
            serializer.collect_str(value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr<T> {
        Number(T),
        Text(String),
    }

    pub fn deserialize<'de, T: Float, D: Deserializer<'de>>(deserializer: D) -> Result<T, D::Error> {
        match Repr::<T>::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => text
                .parse()
                .map_err(|_| de::Error::custom(format!("invalid float {text:?}"))),
        }
    }
}

/// Everything needed to locate and decode one stored array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayDescriptor {
    pub data_type: DataType,
    pub compression: CompressionKind,
    #[serde(with = "json_float")]
    pub scale_factor: f32,
    #[serde(default, with = "json_float")]
    pub add_offset: f32,
    pub dimensions: Vec<u64>,
    pub chunks: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimension_names: Vec<String>,
    /// Absolute file offset of the compressed LUT.
    pub lut_offset: u64,
    /// Total LUT size in bytes, `group_count * group_size`.
    pub lut_size: u64,
    pub lut_chunk_element_count: u64,
}

impl ArrayDescriptor {
    pub fn chunk_count(&self) -> u64 {
        self.dimensions
            .iter()
            .zip(&self.chunks)
            .map(|(&d, &c)| d.div_ceil(c.max(1)))
            .product()
    }

    pub fn element_count(&self) -> u64 {
        self.dimensions.iter().product()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarValue {
    Int8(i8),
    Uint8(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Float(#[serde(with = "json_float")] f32),
    Double(#[serde(with = "json_float")] f64),
    String(String),
}

impl ScalarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Int8(_) => DataType::Int8,
            ScalarValue::Uint8(_) => DataType::Uint8,
            ScalarValue::Int16(_) => DataType::Int16,
            ScalarValue::Uint16(_) => DataType::Uint16,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Uint32(_) => DataType::Uint32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::Uint64(_) => DataType::Uint64,
            ScalarValue::Float(_) => DataType::Float,
            ScalarValue::Double(_) => DataType::Double,
            ScalarValue::String(_) => DataType::String,
        }
    }
}

macro_rules! scalar_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for ScalarValue {
                fn from(v: $t) -> Self {
                    ScalarValue::$variant(v.into())
                }
            }
        )*
    };
}

scalar_from!(
    i8 => Int8, u8 => Uint8, i16 => Int16, u16 => Uint16,
    i32 => Int32, u32 => Uint32, i64 => Int64, u64 => Uint64,
    f32 => Float, f64 => Double, String => String, &str => String,
);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableValue {
    #[default]
    None,
    Scalar(ScalarValue),
    Array(ArrayDescriptor),
}

/// One node of the metadata tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub value: VariableValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Variable>,
}

impl Variable {
    pub fn group(name: impl Into<String>, children: Vec<Variable>) -> Self {
        Self {
            name: name.into(),
            value: VariableValue::None,
            children,
        }
    }

    pub fn scalar(name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self {
            name: name.into(),
            value: VariableValue::Scalar(value.into()),
            children: Vec::new(),
        }
    }

    pub fn array(name: impl Into<String>, descriptor: ArrayDescriptor) -> Self {
        Self {
            name: name.into(),
            value: VariableValue::Array(descriptor),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Variable>) -> Self {
        self.children = children;
        self
    }

    pub fn child(&self, name: &str) -> Option<&Variable> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Resolve a `/`-separated path below this node. An empty path is `self`.
    pub fn find(&self, path: &str) -> Option<&Variable> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    pub fn as_array(&self) -> Option<&ArrayDescriptor> {
        match &self.value {
            VariableValue::Array(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match &self.value {
            VariableValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Every array in the tree, depth first, with its `/`-joined path.
    pub fn arrays(&self) -> Vec<(String, &ArrayDescriptor)> {
        let mut out = Vec::new();
        self.collect_arrays("", &mut out);
        out
    }

    fn collect_arrays<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a ArrayDescriptor)>) {
        for child in &self.children {
            let path = if prefix.is_empty() {
                child.name.clone()
            } else {
                format!("{prefix}/{}", child.name)
            };
            if let Some(descriptor) = child.as_array() {
                out.push((path.clone(), descriptor));
            }
            child.collect_arrays(&path, out);
        }
    }
}
