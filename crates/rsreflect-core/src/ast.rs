//! Declaration tree handed over by the front end
//!
//! The parser and semantic analysis live outside this crate. What arrives
//! here is an already-resolved view of one translation unit: top-level
//! declarations with qualified types, linkage, storage class, source
//! locations and (for functions) parameter lists. Everything derives
//! serde so the driver can load units from JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::ApiLevel;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Declared inside one of the compiler's own built-in headers.
    pub in_system_header: bool,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            in_system_header: false,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "<unknown>:{}:{}", self.line, self.column)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinKind {
    Void,
    Bool,
    CharS,
    SChar,
    CharU,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Half,
    Float,
    Double,
    LongDouble,
    WChar,
    Int128,
}

impl BuiltinKind {
    pub fn spelling(self) -> &'static str {
        match self {
            BuiltinKind::Void => "void",
            BuiltinKind::Bool => "bool",
            BuiltinKind::CharS | BuiltinKind::SChar => "char",
            BuiltinKind::CharU | BuiltinKind::UChar => "unsigned char",
            BuiltinKind::Short => "short",
            BuiltinKind::UShort => "unsigned short",
            BuiltinKind::Int => "int",
            BuiltinKind::UInt => "unsigned int",
            BuiltinKind::Long => "long",
            BuiltinKind::ULong => "unsigned long",
            BuiltinKind::LongLong => "long long",
            BuiltinKind::ULongLong => "unsigned long long",
            BuiltinKind::Half => "half",
            BuiltinKind::Float => "float",
            BuiltinKind::Double => "double",
            BuiltinKind::LongDouble => "long double",
            BuiltinKind::WChar => "wchar_t",
            BuiltinKind::Int128 => "__int128",
        }
    }

    /// Scalars wider than 32 bits, banned in the reduced dialect.
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            BuiltinKind::Double
                | BuiltinKind::LongDouble
                | BuiltinKind::Long
                | BuiltinKind::ULong
                | BuiltinKind::LongLong
                | BuiltinKind::ULongLong
        )
    }
}

/// Index of a record declaration within its translation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u32);

impl RecordId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Builtin(BuiltinKind),
    Record(RecordId),
    Pointer(Box<QualType>),
    ExtVector {
        element: Box<QualType>,
        count: u32,
    },
    ConstantArray {
        element: Box<QualType>,
        size: u64,
    },
    IncompleteArray(Box<QualType>),
    Typedef {
        name: String,
        target: Box<QualType>,
    },
    Enum(String),
    Function,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualType {
    pub ty: SourceType,
    #[serde(default)]
    pub is_const: bool,
}

impl QualType {
    pub fn new(ty: SourceType) -> Self {
        Self {
            ty,
            is_const: false,
        }
    }

    pub fn builtin(kind: BuiltinKind) -> Self {
        Self::new(SourceType::Builtin(kind))
    }

    pub fn void() -> Self {
        Self::builtin(BuiltinKind::Void)
    }

    pub fn int() -> Self {
        Self::builtin(BuiltinKind::Int)
    }

    pub fn uint() -> Self {
        Self::builtin(BuiltinKind::UInt)
    }

    pub fn float() -> Self {
        Self::builtin(BuiltinKind::Float)
    }

    pub fn record(id: RecordId) -> Self {
        Self::new(SourceType::Record(id))
    }

    pub fn pointer_to(pointee: QualType) -> Self {
        Self::new(SourceType::Pointer(Box::new(pointee)))
    }

    pub fn vector(element: BuiltinKind, count: u32) -> Self {
        Self::new(SourceType::ExtVector {
            element: Box::new(Self::builtin(element)),
            count,
        })
    }

    pub fn array(element: QualType, size: u64) -> Self {
        Self::new(SourceType::ConstantArray {
            element: Box::new(element),
            size,
        })
    }

    pub fn typedef(name: impl Into<String>, target: QualType) -> Self {
        Self::new(SourceType::Typedef {
            name: name.into(),
            target: Box::new(target),
        })
    }

    pub fn as_const(mut self) -> Self {
        self.is_const = true;
        self
    }

    /// Strips typedef sugar at the top level, folding qualifiers inward.
    pub fn canonical(&self) -> QualType {
        let mut is_const = self.is_const;
        let mut ty = &self.ty;
        while let SourceType::Typedef { target, .. } = ty {
            is_const |= target.is_const;
            ty = &target.ty;
        }
        QualType {
            ty: ty.clone(),
            is_const,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.canonical().ty, SourceType::Pointer(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self.canonical().ty, SourceType::Builtin(BuiltinKind::Void))
    }

    pub fn is_builtin(&self, kind: BuiltinKind) -> bool {
        self.canonical().ty == SourceType::Builtin(kind)
    }

    /// Canonical pointee when this is a pointer type.
    pub fn pointee(&self) -> Option<QualType> {
        match self.canonical().ty {
            SourceType::Pointer(pointee) => Some(pointee.canonical()),
            _ => None,
        }
    }

    /// Human-readable spelling used in diagnostics.
    pub fn spelling(&self, unit: &TranslationUnit) -> String {
        let base = match &self.ty {
            SourceType::Builtin(kind) => kind.spelling().to_string(),
            SourceType::Record(id) => match unit.record(*id) {
                Some(record) => format!(
                    "{} {}",
                    record.kind.keyword(),
                    record.name.as_deref().unwrap_or("<anonymous>")
                ),
                None => "<invalid record>".to_string(),
            },
            SourceType::Pointer(pointee) => format!("{} *", pointee.spelling(unit)),
            SourceType::ExtVector { element, count } => {
                format!("{} __attribute__((ext_vector_type({})))", element.spelling(unit), count)
            }
            SourceType::ConstantArray { element, size } => {
                format!("{}[{}]", element.spelling(unit), size)
            }
            SourceType::IncompleteArray(element) => format!("{}[]", element.spelling(unit)),
            SourceType::Typedef { name, .. } => name.clone(),
            SourceType::Enum(name) => format!("enum {}", name),
            SourceType::Function => "function".to_string(),
        };
        if self.is_const {
            format!("const {}", base)
        } else {
            base
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    Struct,
    Union,
}

impl RecordKind {
    pub fn keyword(self) -> &'static str {
        match self {
            RecordKind::Struct => "struct",
            RecordKind::Union => "union",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: QualType,
    #[serde(default)]
    pub bit_width: Option<u32>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDecl {
    pub name: Option<String>,
    #[serde(default)]
    pub kind: RecordKind,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub packed: bool,
    #[serde(default)]
    pub has_flexible_array_member: bool,
    /// False for a forward declaration without a body in this unit.
    #[serde(default = "default_true")]
    pub defined: bool,
    #[serde(default)]
    pub location: SourceLocation,
}

fn default_true() -> bool {
    true
}

impl RecordDecl {
    pub fn structure(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            kind: RecordKind::Struct,
            fields: Vec::new(),
            packed: false,
            has_flexible_array_member: false,
            defined: true,
            location: SourceLocation::default(),
        }
    }

    pub fn union(name: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::Union,
            ..Self::structure(name)
        }
    }

    pub fn anonymous() -> Self {
        Self {
            name: None,
            ..Self::structure("")
        }
    }

    pub fn forward(name: impl Into<String>) -> Self {
        Self {
            defined: false,
            ..Self::structure(name)
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: QualType) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            ty,
            bit_width: None,
            location: self.location.clone(),
        });
        self
    }

    pub fn bit_field(mut self, name: impl Into<String>, ty: QualType, width: u32) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            ty,
            bit_width: Some(width),
            location: self.location.clone(),
        });
        self
    }

    pub fn packed(mut self) -> Self {
        self.packed = true;
        self
    }

    pub fn with_flexible_array_member(mut self) -> Self {
        self.has_flexible_array_member = true;
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    #[default]
    External,
    Internal,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    #[default]
    None,
    Static,
    Extern,
}

/// Constant-folded initializer as produced by the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    List(Vec<Initializer>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: QualType,
    #[serde(default)]
    pub linkage: Linkage,
    #[serde(default)]
    pub storage: StorageClass,
    #[serde(default)]
    pub init: Option<Initializer>,
    #[serde(default)]
    pub location: SourceLocation,
}

impl VarDecl {
    pub fn global(name: impl Into<String>, ty: QualType) -> Self {
        Self {
            name: name.into(),
            ty,
            linkage: Linkage::External,
            storage: StorageClass::None,
            init: None,
            location: SourceLocation::default(),
        }
    }

    /// Block-scope variable inside a function body.
    pub fn local(name: impl Into<String>, ty: QualType) -> Self {
        Self {
            linkage: Linkage::None,
            ..Self::global(name, ty)
        }
    }

    pub fn with_init(mut self, init: Initializer) -> Self {
        self.init = Some(init);
        self
    }

    pub fn with_static_storage(mut self) -> Self {
        self.storage = StorageClass::Static;
        if self.linkage == Linkage::External {
            self.linkage = Linkage::Internal;
        }
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub ty: QualType,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub return_type: QualType,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub linkage: Linkage,
    #[serde(default)]
    pub storage: StorageClass,
    #[serde(default = "default_true")]
    pub has_body: bool,
    /// Carries `__attribute__((kernel))`.
    #[serde(default)]
    pub kernel_attr: bool,
    /// Block-scope variables declared in the body.
    #[serde(default)]
    pub locals: Vec<VarDecl>,
    #[serde(default)]
    pub location: SourceLocation,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, return_type: QualType) -> Self {
        Self {
            name: name.into(),
            return_type,
            params: Vec::new(),
            linkage: Linkage::External,
            storage: StorageClass::None,
            has_body: true,
            kernel_attr: false,
            locals: Vec::new(),
            location: SourceLocation::default(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: QualType) -> Self {
        self.params.push(ParamDecl {
            name: name.into(),
            ty,
            location: self.location.clone(),
        });
        self
    }

    pub fn kernel(mut self) -> Self {
        self.kernel_attr = true;
        self
    }

    pub fn without_body(mut self) -> Self {
        self.has_body = false;
        self
    }

    pub fn with_storage(mut self, storage: StorageClass) -> Self {
        self.storage = storage;
        if storage == StorageClass::Static {
            self.linkage = Linkage::Internal;
        }
        self
    }

    pub fn local(mut self, var: VarDecl) -> Self {
        self.locals.push(var);
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decl {
    Var(VarDecl),
    Function(FunctionDecl),
    Record(RecordId),
    Typedef { name: String, ty: QualType },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pragma {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl Pragma {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub file_name: String,
    /// Falls back to the driver's configured level when absent.
    #[serde(default)]
    pub target_api: Option<ApiLevel>,
    #[serde(default)]
    pub strict_dialect: bool,
    #[serde(default)]
    pub pragmas: Vec<Pragma>,
    #[serde(default)]
    pub records: Vec<RecordDecl>,
    #[serde(default)]
    pub decls: Vec<Decl>,
    /// The front end already reported parse or semantic errors.
    #[serde(default)]
    pub has_errors: bool,
}

impl TranslationUnit {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            target_api: None,
            strict_dialect: false,
            pragmas: Vec::new(),
            records: Vec::new(),
            decls: Vec::new(),
            has_errors: false,
        }
    }

    pub fn record(&self, id: RecordId) -> Option<&RecordDecl> {
        self.records.get(id.index())
    }

    /// Body of a record, following a forward declaration to the definition
    /// of the same tag elsewhere in the unit.
    pub fn definition(&self, id: RecordId) -> Option<(RecordId, &RecordDecl)> {
        let record = self.record(id)?;
        if record.defined {
            return Some((id, record));
        }
        let name = record.name.as_deref()?;
        self.records
            .iter()
            .enumerate()
            .find(|(_, r)| r.defined && r.name.as_deref() == Some(name))
            .map(|(index, r)| (RecordId(index as u32), r))
    }

    /// Resolves a type name in the top-level scope: typedef names first,
    /// then struct tags.
    pub fn lookup_type(&self, name: &str) -> Option<QualType> {
        let typedef = self.decls.iter().find_map(|decl| match decl {
            Decl::Typedef { name: n, ty } if n == name => Some(QualType::typedef(n.clone(), ty.clone())),
            _ => None,
        });
        typedef.or_else(|| {
            self.records
                .iter()
                .position(|r| r.name.as_deref() == Some(name) && r.defined)
                .or_else(|| self.records.iter().position(|r| r.name.as_deref() == Some(name)))
                .map(|index| QualType::record(RecordId(index as u32)))
        })
    }
}

/// Fluent construction of translation units for tests and tooling.
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    unit: TranslationUnit,
}

impl UnitBuilder {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            unit: TranslationUnit::new(file_name),
        }
    }

    /// Starts a unit with the two pragmas every exported script needs.
    pub fn script(file_name: impl Into<String>, package: &str) -> Self {
        let mut builder = Self::new(file_name);
        builder
            .pragma(Pragma::new("version", "1"))
            .pragma(Pragma::new("java_package_name", package));
        builder
    }

    pub fn api(&mut self, level: ApiLevel) -> &mut Self {
        self.unit.target_api = Some(level);
        self
    }

    pub fn strict(&mut self, strict: bool) -> &mut Self {
        self.unit.strict_dialect = strict;
        self
    }

    pub fn pragma(&mut self, pragma: Pragma) -> &mut Self {
        self.unit.pragmas.push(pragma);
        self
    }

    /// Adds a record and a top-level declaration for it.
    pub fn record(&mut self, record: RecordDecl) -> RecordId {
        let id = RecordId(self.unit.records.len() as u32);
        self.unit.records.push(record);
        self.unit.decls.push(Decl::Record(id));
        id
    }

    /// Replaces a previously added record, for self-referential layouts.
    pub fn redefine(&mut self, id: RecordId, record: RecordDecl) -> &mut Self {
        if let Some(slot) = self.unit.records.get_mut(id.index()) {
            *slot = record;
        }
        self
    }

    pub fn typedef(&mut self, name: impl Into<String>, ty: QualType) -> &mut Self {
        self.unit.decls.push(Decl::Typedef {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn var(&mut self, var: VarDecl) -> &mut Self {
        self.unit.decls.push(Decl::Var(var));
        self
    }

    pub fn function(&mut self, function: FunctionDecl) -> &mut Self {
        self.unit.decls.push(Decl::Function(function));
        self
    }

    pub fn with_front_end_errors(&mut self) -> &mut Self {
        self.unit.has_errors = true;
        self
    }

    pub fn build(&self) -> TranslationUnit {
        self.unit.clone()
    }
}
