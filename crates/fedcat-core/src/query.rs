//! Query expression tree.
//!
//! A [`QueryExpression`] is built by the caller and stays opaque to the
//! service except for its bucket annotations and node kinds, which drive
//! capability dispatch. Backends receive it, renamed into their own
//! vocabulary, as a [`NativeQuery`].

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Comparison operator for [`QueryNode::Comparison`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    /// Whether `ordering` (left compared to right) satisfies the operator.
    pub fn accepts(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// Boolean connective of a [`QueryNode::Group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
        }
    }
}

/// Node kind, used for capability checks and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    Term,
    Comparison,
    FreeText,
    Not,
    Group,
}

/// Shape of one node in the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryNode {
    /// Attribute equals any of the values.
    Term { name: String, values: Vec<String> },
    /// Attribute compared against a single value.
    Comparison {
        name: String,
        op: ComparisonOp,
        value: String,
    },
    /// Text search, optionally confined to one attribute.
    FreeText {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        text: String,
    },
    Not { child: Box<QueryExpression> },
    Group {
        op: LogicalOp,
        children: Vec<QueryExpression>,
    },
}

/// A node plus its optional bucket annotation.
///
/// An empty `bucket_names` set means any dictionary that recognises the
/// shape may evaluate the node. A non-empty set restricts evaluation to
/// dictionaries serving one of the named buckets.
///
/// # Example
///
/// ```
/// use fedcat_core::{ComparisonOp, QueryExpression};
///
/// let q = QueryExpression::and(vec![
///     QueryExpression::term("ProductType", ["L1B"]),
///     QueryExpression::comparison("Cycle", ComparisonOp::Ge, "12"),
/// ])
/// .in_buckets(["Products"]);
///
/// assert!(q.allows_bucket("Products"));
/// assert!(!q.allows_bucket("Granules"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExpression {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub bucket_names: BTreeSet<String>,
    #[serde(flatten)]
    pub node: QueryNode,
}

impl QueryExpression {
    pub fn new(node: QueryNode) -> Self {
        Self {
            bucket_names: BTreeSet::new(),
            node,
        }
    }

    pub fn term<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(QueryNode::Term {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn comparison(name: impl Into<String>, op: ComparisonOp, value: impl Into<String>) -> Self {
        Self::new(QueryNode::Comparison {
            name: name.into(),
            op,
            value: value.into(),
        })
    }

    /// Free text across all attributes.
    pub fn free_text(text: impl Into<String>) -> Self {
        Self::new(QueryNode::FreeText {
            name: None,
            text: text.into(),
        })
    }

    /// Free text confined to one attribute.
    pub fn free_text_in(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(QueryNode::FreeText {
            name: Some(name.into()),
            text: text.into(),
        })
    }

    pub fn not(child: QueryExpression) -> Self {
        Self::new(QueryNode::Not {
            child: Box::new(child),
        })
    }

    pub fn and(children: Vec<QueryExpression>) -> Self {
        Self::new(QueryNode::Group {
            op: LogicalOp::And,
            children,
        })
    }

    pub fn or(children: Vec<QueryExpression>) -> Self {
        Self::new(QueryNode::Group {
            op: LogicalOp::Or,
            children,
        })
    }

    /// Restrict this node to the named buckets.
    pub fn in_buckets<I, S>(mut self, buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bucket_names.extend(buckets.into_iter().map(Into::into));
        self
    }

    pub fn kind(&self) -> ExpressionKind {
        match self.node {
            QueryNode::Term { .. } => ExpressionKind::Term,
            QueryNode::Comparison { .. } => ExpressionKind::Comparison,
            QueryNode::FreeText { .. } => ExpressionKind::FreeText,
            QueryNode::Not { .. } => ExpressionKind::Not,
            QueryNode::Group { .. } => ExpressionKind::Group,
        }
    }

    fn children(&self) -> &[QueryExpression] {
        match &self.node {
            QueryNode::Not { child } => std::slice::from_ref(child.as_ref()),
            QueryNode::Group { children, .. } => children,
            _ => &[],
        }
    }

    /// True when this node's own annotation admits `bucket`.
    pub fn annotation_allows(&self, bucket: &str) -> bool {
        self.bucket_names.is_empty() || self.bucket_names.contains(bucket)
    }

    /// True when every node in the tree admits `bucket`.
    pub fn allows_bucket(&self, bucket: &str) -> bool {
        self.annotation_allows(bucket) && self.children().iter().all(|c| c.allows_bucket(bucket))
    }

    /// True when any node in the tree is a free-text search.
    pub fn requires_free_text(&self) -> bool {
        self.kind() == ExpressionKind::FreeText
            || self.children().iter().any(QueryExpression::requires_free_text)
    }

    /// Attribute names referenced anywhere in the tree, in first-seen order.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        let name = match &self.node {
            QueryNode::Term { name, .. } | QueryNode::Comparison { name, .. } => Some(name),
            QueryNode::FreeText { name, .. } => name.as_ref(),
            _ => None,
        };
        if let Some(n) = name {
            if !out.contains(&n.as_str()) {
                out.push(n.as_str());
            }
        }
        for child in self.children() {
            child.collect_names(out);
        }
    }

    /// Copy of the tree with every attribute name passed through `rename`.
    pub fn map_names<F>(&self, rename: &F) -> QueryExpression
    where
        F: Fn(&str) -> String,
    {
        let node = match &self.node {
            QueryNode::Term { name, values } => QueryNode::Term {
                name: rename(name),
                values: values.clone(),
            },
            QueryNode::Comparison { name, op, value } => QueryNode::Comparison {
                name: rename(name),
                op: *op,
                value: value.clone(),
            },
            QueryNode::FreeText { name, text } => QueryNode::FreeText {
                name: name.as_deref().map(rename),
                text: text.clone(),
            },
            QueryNode::Not { child } => QueryNode::Not {
                child: Box::new(child.map_names(rename)),
            },
            QueryNode::Group { op, children } => QueryNode::Group {
                op: *op,
                children: children.iter().map(|c| c.map_names(rename)).collect(),
            },
        };
        QueryExpression {
            bucket_names: self.bucket_names.clone(),
            node,
        }
    }

    /// Flatten nested same-operator groups, unwrap single-child groups and
    /// collapse double negation.
    ///
    /// Bucket annotations are combined so that [`allows_bucket`] answers the
    /// same for every bucket before and after. A rewrite whose annotations
    /// cannot be combined is skipped.
    ///
    /// [`allows_bucket`]: QueryExpression::allows_bucket
    pub fn simplify(self) -> QueryExpression {
        let QueryExpression { bucket_names, node } = self;
        match node {
            QueryNode::Not { child } => {
                let child = child.simplify();
                match child.node {
                    QueryNode::Not { child: inner } => {
                        let combined = combine_annotations(&bucket_names, &child.bucket_names)
                            .and_then(|b| combine_annotations(&b, &inner.bucket_names));
                        match combined {
                            Some(buckets) => QueryExpression {
                                bucket_names: buckets,
                                node: inner.node,
                            }
                            .simplify(),
                            None => QueryExpression {
                                bucket_names,
                                node: QueryNode::Not {
                                    child: Box::new(QueryExpression {
                                        bucket_names: child.bucket_names,
                                        node: QueryNode::Not { child: inner },
                                    }),
                                },
                            },
                        }
                    }
                    _ => QueryExpression {
                        bucket_names,
                        node: QueryNode::Not {
                            child: Box::new(child),
                        },
                    },
                }
            }
            QueryNode::Group { op, children } => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children.into_iter().map(QueryExpression::simplify) {
                    let absorbable = child.bucket_names.is_empty() || child.bucket_names == bucket_names;
                    match child.node {
                        QueryNode::Group {
                            op: child_op,
                            children: grand,
                        } if child_op == op && absorbable => flat.extend(grand),
                        node => flat.push(QueryExpression {
                            bucket_names: child.bucket_names,
                            node,
                        }),
                    }
                }
                if flat.len() == 1 {
                    let only = flat.remove(0);
                    if let Some(buckets) = combine_annotations(&bucket_names, &only.bucket_names) {
                        return QueryExpression {
                            bucket_names: buckets,
                            node: only.node,
                        };
                    }
                    flat.push(only);
                }
                QueryExpression {
                    bucket_names,
                    node: QueryNode::Group {
                        op,
                        children: flat,
                    },
                }
            }
            leaf => QueryExpression {
                bucket_names,
                node: leaf,
            },
        }
    }
}

/// Annotation equivalent to requiring both `a` and `b`, or `None` when no
/// single set expresses that (both non-empty and disjoint).
fn combine_annotations(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Option<BTreeSet<String>> {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => Some(b.clone()),
        (_, true) => Some(a.clone()),
        _ => {
            let both: BTreeSet<String> = a.intersection(b).cloned().collect();
            (!both.is_empty()).then_some(both)
        }
    }
}

impl fmt::Display for QueryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.bucket_names.is_empty() {
            let names: Vec<&str> = self.bucket_names.iter().map(String::as_str).collect();
            write!(f, "{{{}}}:", names.join(","))?;
        }
        match &self.node {
            QueryNode::Term { name, values } => {
                if values.len() == 1 {
                    write!(f, "{} = {:?}", name, values[0])
                } else {
                    write!(f, "{} IN {:?}", name, values)
                }
            }
            QueryNode::Comparison { name, op, value } => write!(f, "{name} {op} {value:?}"),
            QueryNode::FreeText { name: Some(name), text } => write!(f, "{name} ~ {text:?}"),
            QueryNode::FreeText { name: None, text } => write!(f, "~ {text:?}"),
            QueryNode::Not { child } => write!(f, "NOT ({child})"),
            QueryNode::Group { op, children } => {
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {op} ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A query translated by one dictionary for its index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeQuery {
    /// Bucket of the dictionary that produced the translation.
    pub bucket: String,
    pub expression: QueryExpression,
}

impl NativeQuery {
    pub fn new(bucket: impl Into<String>, expression: QueryExpression) -> Self {
        Self {
            bucket: bucket.into(),
            expression,
        }
    }
}

impl fmt::Display for NativeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.bucket, self.expression)
    }
}
