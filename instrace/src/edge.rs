use serde_derive::{Deserialize, Serialize};
use std::collections::btree_map::{BTreeMap, Entry};
use std::fmt::{Display, Formatter, Result as DisplayResult};

use crate::error::{Result, TraceError};

/// How control reached the successor of an edge. Decided by the predecessor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeType {
    Direct,
    Indirect,
    Conditional,
    Syscall,
    Return,
    Regular,
    Unknown,
}

impl EdgeType {
    pub const ALL: [EdgeType; 7] = [
        EdgeType::Direct,
        EdgeType::Indirect,
        EdgeType::Conditional,
        EdgeType::Syscall,
        EdgeType::Return,
        EdgeType::Regular,
        EdgeType::Unknown,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            EdgeType::Direct => "Direct",
            EdgeType::Indirect => "Indirect",
            EdgeType::Conditional => "Conditional",
            EdgeType::Syscall => "Syscall",
            EdgeType::Return => "Return",
            EdgeType::Regular => "Regular",
            EdgeType::Unknown => "Unknown",
        }
    }

    pub fn classify(class: &InstructionClass) -> EdgeType {
        if class.is_return {
            return EdgeType::Return;
        }
        if class.is_call || class.is_branch {
            if class.is_conditional {
                EdgeType::Conditional
            } else if class.is_indirect {
                EdgeType::Indirect
            } else if class.is_direct {
                EdgeType::Direct
            } else {
                EdgeType::Unknown
            }
        } else if class.is_syscall {
            EdgeType::Syscall
        } else {
            EdgeType::Regular
        }
    }
}

impl Display for EdgeType {
    fn fmt(&self, f: &mut Formatter) -> DisplayResult {
        f.write_str(self.name())
    }
}

/// Static properties of an instruction, as reported by whatever decodes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstructionClass {
    pub is_return: bool,
    pub is_call: bool,
    pub is_branch: bool,
    pub is_conditional: bool,
    pub is_indirect: bool,
    pub is_direct: bool,
    pub is_syscall: bool,
}

impl From<InstructionClass> for EdgeType {
    fn from(class: InstructionClass) -> Self {
        EdgeType::classify(&class)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub edge_type: EdgeType,
    pub count: u64,
}

/// Every observed `(predecessor, successor)` transition, ordered by key.
#[derive(Debug, Default)]
pub struct EdgeStore {
    edges: BTreeMap<(u64, u64), Edge>,
}

impl EdgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one traversal of `from -> to`. The first traversal fixes the
    /// edge type; a later traversal with another type is a conflict and
    /// leaves the edge untouched.
    pub fn record(&mut self, from: u64, to: u64, edge_type: EdgeType) -> Result<()> {
        let edge = match self.edges.entry((from, to)) {
            Entry::Vacant(entry) => entry.insert(Edge {
                edge_type,
                count: 0,
            }),
            Entry::Occupied(entry) => {
                let edge = entry.into_mut();
                if edge.edge_type != edge_type {
                    return Err(TraceError::EdgeTypeConflict {
                        from,
                        to,
                        recorded: edge.edge_type,
                        observed: edge_type,
                    });
                }
                edge
            }
        };
        edge.count += 1;
        Ok(())
    }

    pub fn get(&self, from: u64, to: u64) -> Option<&Edge> {
        self.edges.get(&(from, to))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(u64, u64), &Edge)> {
        self.edges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_order() {
        let ret = InstructionClass {
            is_return: true,
            is_branch: true,
            ..Default::default()
        };
        assert_eq!(EdgeType::from(ret), EdgeType::Return);

        let jcc = InstructionClass {
            is_branch: true,
            is_conditional: true,
            is_direct: true,
            ..Default::default()
        };
        assert_eq!(EdgeType::from(jcc), EdgeType::Conditional);

        let call_reg = InstructionClass {
            is_call: true,
            is_indirect: true,
            ..Default::default()
        };
        assert_eq!(EdgeType::from(call_reg), EdgeType::Indirect);

        let jmp = InstructionClass {
            is_branch: true,
            is_direct: true,
            ..Default::default()
        };
        assert_eq!(EdgeType::from(jmp), EdgeType::Direct);

        let odd = InstructionClass {
            is_branch: true,
            ..Default::default()
        };
        assert_eq!(EdgeType::from(odd), EdgeType::Unknown);

        let syscall = InstructionClass {
            is_syscall: true,
            ..Default::default()
        };
        assert_eq!(EdgeType::from(syscall), EdgeType::Syscall);
        assert_eq!(EdgeType::from(InstructionClass::default()), EdgeType::Regular);
    }

    #[test]
    fn conflict_keeps_first_type() {
        let mut edges = EdgeStore::new();
        edges.record(1, 2, EdgeType::Direct).unwrap();
        let err = edges.record(1, 2, EdgeType::Indirect).unwrap_err();
        assert!(matches!(
            err,
            TraceError::EdgeTypeConflict {
                from: 1,
                to: 2,
                recorded: EdgeType::Direct,
                observed: EdgeType::Indirect,
            }
        ));
        assert_eq!(
            edges.get(1, 2),
            Some(&Edge {
                edge_type: EdgeType::Direct,
                count: 1
            })
        );
    }
}
