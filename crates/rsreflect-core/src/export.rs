//! Entities made visible to the host

use serde::Serialize;

use crate::ast::SourceLocation;
use crate::kernel::{KernelRoles, Signature, ROOT_NAME};
use crate::types::TypeId;

/// Constant scalar folded from an initializer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitValue {
    Scalar(Scalar),
    Vector(Vec<Scalar>),
    Array(Vec<InitValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportVar {
    pub name: String,
    pub ty: TypeId,
    pub init: Option<InitValue>,
    pub is_const: bool,
    pub is_unsigned: bool,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportParam {
    pub name: String,
    pub ty: TypeId,
}

/// Invokable function; parameters travel as one synthesized record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportFunc {
    pub name: String,
    pub params: Vec<ExportParam>,
    pub packet: Option<TypeId>,
    pub location: SourceLocation,
}

impl ExportFunc {
    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportForEach {
    pub name: String,
    pub roles: KernelRoles,
    pub signature: Signature,
    pub in_type: Option<TypeId>,
    pub out_type: Option<TypeId>,
    /// Return type of a pass-by-value kernel
    pub result_type: Option<TypeId>,
    /// Record wrapping the user-data pointee
    pub param_packet: Option<TypeId>,
    pub is_dummy_root: bool,
    pub location: SourceLocation,
}

impl ExportForEach {
    /// Placeholder that keeps slot 0 for `root` when the script has none.
    pub fn dummy_root() -> Self {
        Self {
            name: ROOT_NAME.to_string(),
            roles: KernelRoles::default(),
            signature: Signature::NONE,
            in_type: None,
            out_type: None,
            result_type: None,
            param_packet: None,
            is_dummy_root: true,
            location: SourceLocation::default(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.name == ROOT_NAME
    }

    pub fn is_pass_by_value(&self) -> bool {
        self.roles.pass_by_value
    }

    pub fn has_return(&self) -> bool {
        self.roles.has_return
    }

    pub fn has_in(&self) -> bool {
        self.signature.contains(Signature::IN)
    }

    pub fn has_out(&self) -> bool {
        self.signature.contains(Signature::OUT)
    }

    pub fn has_usr_data(&self) -> bool {
        self.signature.contains(Signature::USR_DATA)
    }
}

/// Every entity created for a file, for lifetime bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exportable {
    Var(String),
    Func(String),
    ForEach(String),
    Type(TypeId),
}
