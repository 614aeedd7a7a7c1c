//! The closed set of functoid kinds.
//!
//! Wire names are `Category.Name` (e.g. `Binary.Multiply`). Anything else
//! deserializes into [`NodeKind::Unknown`]; a MapSpec written by a newer editor
//! still loads, and the unknown node degrades to a placeholder downstream.
use std::fmt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Math,
    String,
    Logical,
    Conditional,
    Collection,
    Aggregate,
    Conversion,
    DateTime,
    Constant,
    Custom,
}

macro_rules! node_kinds {
    ($( $variant:ident => $wire:literal, $category:ident; )*) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum NodeKind {
            $( $variant, )*
            Unknown(String),
        }

        impl NodeKind {
            pub const KNOWN: &'static [NodeKind] = &[ $( NodeKind::$variant, )* ];

            pub fn as_str(&self) -> &str {
                match self {
                    $( NodeKind::$variant => $wire, )*
                    NodeKind::Unknown(raw) => raw,
                }
            }

            pub fn category(&self) -> Category {
                match self {
                    $( NodeKind::$variant => Category::$category, )*
                    NodeKind::Unknown(_) => Category::Custom,
                }
            }

            pub fn parse(raw: &str) -> NodeKind {
                match raw {
                    $( $wire => NodeKind::$variant, )*
                    other => NodeKind::Unknown(other.to_string()),
                }
            }
        }
    };
}

node_kinds! {
    Add                => "Binary.Add", Math;
    Subtract           => "Binary.Subtract", Math;
    Multiply           => "Binary.Multiply", Math;
    Divide             => "Binary.Divide", Math;
    Modulo             => "Binary.Modulo", Math;
    Power              => "Binary.Power", Math;
    Equal              => "Binary.Equal", Logical;
    NotEqual           => "Binary.NotEqual", Logical;
    GreaterThan        => "Binary.GreaterThan", Logical;
    GreaterThanOrEqual => "Binary.GreaterThanOrEqual", Logical;
    LessThan           => "Binary.LessThan", Logical;
    LessThanOrEqual    => "Binary.LessThanOrEqual", Logical;
    And                => "Binary.And", Logical;
    Or                 => "Binary.Or", Logical;
    Coalesce           => "Binary.Coalesce", Conditional;
    Negate             => "Unary.Negate", Math;
    Not                => "Unary.Not", Logical;
    Abs                => "Math.Abs", Math;
    Round              => "Math.Round", Math;
    Floor              => "Math.Floor", Math;
    Ceil               => "Math.Ceil", Math;
    Sqrt               => "Math.Sqrt", Math;
    Min                => "Math.Min", Math;
    Max                => "Math.Max", Math;
    Concat             => "String.Concat", String;
    Upper              => "String.Upper", String;
    Lower              => "String.Lower", String;
    Trim               => "String.Trim", String;
    Substring          => "String.Substring", String;
    Replace            => "String.Replace", String;
    Split              => "String.Split", String;
    Join               => "String.Join", String;
    Length             => "String.Length", String;
    Contains           => "String.Contains", String;
    StartsWith         => "String.StartsWith", String;
    EndsWith           => "String.EndsWith", String;
    PadLeft            => "String.PadLeft", String;
    IfElse             => "Conditional.IfElse", Conditional;
    IsNull             => "Conditional.IsNull", Conditional;
    IsEmpty            => "Conditional.IsEmpty", Conditional;
    Distinct           => "Collection.Distinct", Collection;
    First              => "Collection.First", Collection;
    Last               => "Collection.Last", Collection;
    Reverse            => "Collection.Reverse", Collection;
    Sort               => "Collection.Sort", Collection;
    Flatten            => "Collection.Flatten", Collection;
    Sum                => "Aggregate.Sum", Aggregate;
    Average            => "Aggregate.Average", Aggregate;
    MinOf              => "Aggregate.Min", Aggregate;
    MaxOf              => "Aggregate.Max", Aggregate;
    Count              => "Aggregate.Count", Aggregate;
    ToString           => "Conversion.ToString", Conversion;
    ToNumber           => "Conversion.ToNumber", Conversion;
    ToInteger          => "Conversion.ToInteger", Conversion;
    ToBoolean          => "Conversion.ToBoolean", Conversion;
    ParseJson          => "Conversion.ParseJson", Conversion;
    ToJson             => "Conversion.ToJson", Conversion;
    Now                => "DateTime.Now", DateTime;
    FormatDate         => "DateTime.Format", DateTime;
    ParseDate          => "DateTime.Parse", DateTime;
    AddDays            => "DateTime.AddDays", DateTime;
    ToUnix             => "DateTime.ToUnix", DateTime;
    StringConstant     => "Constant.String", Constant;
    NumberConstant     => "Constant.Number", Constant;
    BooleanConstant    => "Constant.Boolean", Constant;
    NullConstant       => "Constant.Null", Constant;
    CustomFunction     => "Custom.Function", Custom;
    CustomExpression   => "Custom.Expression", Custom;
}

impl From<String> for NodeKind {
    fn from(raw: String) -> Self {
        NodeKind::parse(&raw)
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NodeKind {
    /// Short lowercase name used to seed shared-variable names (`multiply1`, `now2`).
    pub fn slug(&self) -> String {
        let name = self.as_str().rsplit('.').next().unwrap_or("value");
        let mut out = String::with_capacity(name.len());
        for (i, c) in name.chars().enumerate() {
            if !c.is_ascii_alphanumeric() {
                continue;
            }
            if i == 0 { out.push(c.to_ascii_lowercase()) } else { out.push(c) }
        }
        if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
            out.insert_str(0, "value");
        }
        out
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, NodeKind::Unknown(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip_through_serde() {
        for kind in NodeKind::KNOWN {
            let json = serde_json::to_string(kind).unwrap();
            let back: NodeKind = serde_json::from_str(&json).unwrap();
            assert_eq!(&back, kind);
        }
    }

    #[test]
    fn unknown_kinds_do_not_fail_deserialization() {
        let kind: NodeKind = serde_json::from_str("\"Geo.Distance\"").unwrap();
        assert_eq!(kind, NodeKind::Unknown("Geo.Distance".into()));
        assert_eq!(kind.category(), Category::Custom);
        assert!(kind.is_unknown());
    }

    #[test]
    fn catalogue_is_large_and_unique() {
        let mut names: Vec<&str> = NodeKind::KNOWN.iter().map(|k| k.as_str()).collect();
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(before, names.len());
        assert!(before >= 60);
    }

    #[test]
    fn slugs_are_identifiers() {
        assert_eq!(NodeKind::Multiply.slug(), "multiply");
        assert_eq!(NodeKind::FormatDate.slug(), "format");
        assert_eq!(NodeKind::Unknown("x.9lives".into()).slug(), "value9lives");
    }
}
