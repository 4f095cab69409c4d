use crate::graph::ParamValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Int,
    Bool,
    Vec3,
    String,
}

impl ParamKind {
    pub fn accepts(self, value: &ParamValue) -> bool {
        matches!(
            (self, value),
            (ParamKind::Float, ParamValue::Float(_))
                | (ParamKind::Float, ParamValue::Int(_))
                | (ParamKind::Int, ParamValue::Int(_))
                | (ParamKind::Bool, ParamValue::Bool(_))
                | (ParamKind::Vec3, ParamValue::Vec3(_))
                | (ParamKind::String, ParamValue::String(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamRange {
    Float { min: f32, max: f32 },
    Int { min: i32, max: i32 },
}

/// Describes one tweakable parameter of a node: what it is called, what it
/// holds, and the range a control surface should offer.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: ParamKind,
    pub range: Option<ParamRange>,
    pub options: Vec<(i32, &'static str)>,
    pub help: Option<&'static str>,
}

impl ParamSpec {
    pub fn new(key: &'static str, label: &'static str, kind: ParamKind) -> Self {
        Self {
            key,
            label,
            kind,
            range: None,
            options: Vec::new(),
            help: None,
        }
    }

    pub fn float(key: &'static str, label: &'static str) -> Self {
        Self::new(key, label, ParamKind::Float)
    }

    pub fn float_slider(key: &'static str, label: &'static str, min: f32, max: f32) -> Self {
        Self::float(key, label).with_range(ParamRange::Float { min, max })
    }

    pub fn int(key: &'static str, label: &'static str) -> Self {
        Self::new(key, label, ParamKind::Int)
    }

    pub fn int_slider(key: &'static str, label: &'static str, min: i32, max: i32) -> Self {
        Self::int(key, label).with_range(ParamRange::Int { min, max })
    }

    pub fn int_enum(
        key: &'static str,
        label: &'static str,
        options: Vec<(i32, &'static str)>,
    ) -> Self {
        let mut spec = Self::int(key, label);
        spec.options = options;
        spec
    }

    pub fn bool(key: &'static str, label: &'static str) -> Self {
        Self::new(key, label, ParamKind::Bool)
    }

    pub fn vec3(key: &'static str, label: &'static str) -> Self {
        Self::new(key, label, ParamKind::Vec3)
    }

    pub fn string(key: &'static str, label: &'static str) -> Self {
        Self::new(key, label, ParamKind::String)
    }

    pub fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }

    pub fn with_range(mut self, range: ParamRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Clamps numeric values into the declared range. Other kinds pass through.
    pub fn clamp(&self, value: ParamValue) -> ParamValue {
        match (self.range, value) {
            (Some(ParamRange::Float { min, max }), ParamValue::Float(v)) => {
                ParamValue::Float(v.clamp(min, max))
            }
            (Some(ParamRange::Int { min, max }), ParamValue::Int(v)) => {
                ParamValue::Int(v.clamp(min, max))
            }
            (_, value) => value,
        }
    }
}
