//! Kernel signature resolution
//!
//! Decides what kind of entry point a function is and, for compute
//! kernels, which parameter plays which role. Two grammars exist:
//!
//! - legacy (pointer parameters): `[const T* in] [T* out] [const U* usrData] [uint x] [uint y]`
//! - pass-by-value (`__attribute__((kernel))`): `[R] k([T in] [uint x] [uint y])`
//!
//! Trailing `x`/`y` parameters are filled by position unless named `x`
//! or `y`, in which case the name wins.

use std::fmt;
use std::ops::BitOr;

use serde::Serialize;

use crate::api::ApiLevel;
use crate::ast::{BuiltinKind, FunctionDecl, ParamDecl, TranslationUnit};
use crate::diagnostics::{Diagnostic, DiagnosticCategory, Diagnostics};

pub const ROOT_NAME: &str = "root";
pub const INIT_NAME: &str = "init";
pub const DTOR_NAME: &str = ".rs.dtor";

/// Role bitmask recorded in the compiled script's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Signature(u32);

impl Signature {
    pub const NONE: Signature = Signature(0);
    pub const IN: Signature = Signature(0x01);
    /// Output pointer or non-void return
    pub const OUT: Signature = Signature(0x02);
    pub const USR_DATA: Signature = Signature(0x04);
    pub const X: Signature = Signature(0x08);
    pub const Y: Signature = Signature(0x10);
    pub const KERNEL: Signature = Signature(0x20);

    const ALL_BITS: u32 = 0x3f;

    /// Contiguous shapes allowed for legacy kernels before ICS.
    pub const LEGACY_SHAPES: [Signature; 5] = [
        Signature(0x01),
        Signature(0x03),
        Signature(0x07),
        Signature(0x0f),
        Signature(0x1f),
    ];

    pub fn from_bits(bits: u32) -> Signature {
        Signature(bits & Self::ALL_BITS)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Signature) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Signature, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    pub fn is_legacy_shape(self) -> bool {
        Self::LEGACY_SHAPES.contains(&self)
    }
}

impl BitOr for Signature {
    type Output = Signature;

    fn bitor(self, rhs: Signature) -> Signature {
        Signature(self.0 | rhs.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionClass {
    /// Legacy graphics `int root()`, never exported
    GraphicsRoot,
    Init,
    Dtor,
    ForEach,
    Invokable,
}

impl FunctionClass {
    pub fn is_special(self) -> bool {
        matches!(
            self,
            FunctionClass::GraphicsRoot | FunctionClass::Init | FunctionClass::Dtor
        )
    }
}

pub fn is_graphics_root(function: &FunctionDecl, api: ApiLevel) -> bool {
    if function.kernel_attr || function.name != ROOT_NAME {
        return false;
    }
    match function.params.len() {
        0 => true,
        1 => api < ApiLevel::ICS && function.return_type.is_builtin(BuiltinKind::Int),
        _ => false,
    }
}

pub fn classify(function: &FunctionDecl, api: ApiLevel) -> FunctionClass {
    if function.kernel_attr {
        return FunctionClass::ForEach;
    }
    if is_graphics_root(function, api) {
        return FunctionClass::GraphicsRoot;
    }
    match function.name.as_str() {
        INIT_NAME => return FunctionClass::Init,
        DTOR_NAME => return FunctionClass::Dtor,
        ROOT_NAME => return FunctionClass::ForEach,
        _ => {}
    }
    match function.params.first() {
        Some(first) if first.ty.is_pointer() => FunctionClass::ForEach,
        _ => FunctionClass::Invokable,
    }
}

fn shape_error(diagnostics: &mut Diagnostics, function: &FunctionDecl, message: String) {
    diagnostics.push(
        Diagnostic::error(DiagnosticCategory::KernelShape, message)
            .at(&function.location)
            .for_decl(&function.name),
    );
}

fn param_error(diagnostics: &mut Diagnostics, function: &FunctionDecl, param: &ParamDecl, message: String) {
    diagnostics.push(
        Diagnostic::error(DiagnosticCategory::KernelShape, message)
            .at(&param.location)
            .for_decl(&function.name),
    );
}

/// Checks the fixed shapes of `root`, `init` and the destructor hook.
pub fn validate_special_function(
    unit: &TranslationUnit,
    function: &FunctionDecl,
    class: FunctionClass,
    diagnostics: &mut Diagnostics,
) -> bool {
    let mut valid = true;
    match class {
        FunctionClass::GraphicsRoot => {
            if let Some(param) = function.params.first() {
                if !param.ty.is_builtin(BuiltinKind::Int) {
                    param_error(
                        diagnostics,
                        function,
                        param,
                        format!(
                            "invalid parameter type for legacy graphics root() function: {}",
                            param.ty.spelling(unit)
                        ),
                    );
                    valid = false;
                }
            }
            if !function.return_type.is_builtin(BuiltinKind::Int) {
                shape_error(
                    diagnostics,
                    function,
                    "root() is required to return an int for graphics usage".to_string(),
                );
                valid = false;
            }
        }
        FunctionClass::Init | FunctionClass::Dtor => {
            if !function.params.is_empty() {
                shape_error(
                    diagnostics,
                    function,
                    format!("{}(void) is required to have no parameters", function.name),
                );
                valid = false;
            }
            if !function.return_type.is_void() {
                shape_error(
                    diagnostics,
                    function,
                    format!("{}(void) is required to have a void return type", function.name),
                );
                valid = false;
            }
        }
        FunctionClass::ForEach | FunctionClass::Invokable => {}
    }
    valid
}

/// Parameter indices by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KernelRoles {
    pub input: Option<usize>,
    pub output: Option<usize>,
    pub usr_data: Option<usize>,
    pub x: Option<usize>,
    pub y: Option<usize>,
    pub has_return: bool,
    pub pass_by_value: bool,
}

impl KernelRoles {
    pub fn signature(&self) -> Signature {
        let mut signature = Signature::NONE;
        signature.set(Signature::IN, self.input.is_some());
        signature.set(Signature::OUT, self.output.is_some() || self.has_return);
        signature.set(Signature::USR_DATA, self.usr_data.is_some());
        signature.set(Signature::X, self.x.is_some());
        signature.set(Signature::Y, self.y.is_some());
        signature.set(Signature::KERNEL, self.pass_by_value);
        signature
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamState {
    AwaitingIn,
    AwaitingOut,
    AwaitingUsrData,
    AssigningXY,
}

struct RoleResolver<'a, 'd> {
    unit: &'a TranslationUnit,
    function: &'a FunctionDecl,
    roles: KernelRoles,
    valid: bool,
    diagnostics: &'d mut Diagnostics,
}

impl<'a, 'd> RoleResolver<'a, 'd> {
    fn fail(&mut self, message: String) {
        shape_error(self.diagnostics, self.function, message);
        self.valid = false;
    }

    fn fail_at(&mut self, param: &ParamDecl, message: String) {
        param_error(self.diagnostics, self.function, param, message);
        self.valid = false;
    }

    fn unexpected(&mut self, param: &ParamDecl) {
        let message = format!(
            "Unexpected kernel {}() parameter '{}' of type '{}'",
            self.function.name,
            param.name,
            param.ty.spelling(self.unit)
        );
        self.fail_at(param, message);
    }

    fn resolve_legacy(&mut self) {
        let function = self.function;
        if !function.return_type.is_void() {
            self.fail(format!(
                "Compute kernel {}() is required to return a void type",
                function.name
            ));
        }

        let params = &function.params;
        let mut state = ParamState::AwaitingIn;
        let mut index = 0;
        while index < params.len() && state != ParamState::AssigningXY {
            let pointee = params[index].ty.pointee();
            state = match state {
                ParamState::AwaitingIn => {
                    if pointee.as_ref().is_some_and(|p| p.is_const) {
                        self.roles.input = Some(index);
                        index += 1;
                    }
                    ParamState::AwaitingOut
                }
                ParamState::AwaitingOut => {
                    if pointee.as_ref().is_some_and(|p| !p.is_const) {
                        self.roles.output = Some(index);
                        index += 1;
                    }
                    ParamState::AwaitingUsrData
                }
                ParamState::AwaitingUsrData => {
                    if pointee.as_ref().is_some_and(|p| p.is_const) {
                        self.roles.usr_data = Some(index);
                        index += 1;
                    }
                    ParamState::AssigningXY
                }
                ParamState::AssigningXY => ParamState::AssigningXY,
            };
        }

        if self.roles.input.is_none() && self.roles.output.is_none() {
            self.fail(format!(
                "Compute kernel {}() must have at least one parameter for in or out",
                function.name
            ));
        }

        self.assign_xy(index);
    }

    fn resolve_pass_by_value(&mut self, api: ApiLevel) -> bool {
        let function = self.function;
        self.roles.pass_by_value = true;

        if api < ApiLevel::JB_MR1 {
            self.fail(format!(
                "Compute kernel {}() targeting SDK levels 11-{} may not use pass-by-value with __attribute__((kernel))",
                function.name,
                ApiLevel::JB
            ));
            return false;
        }

        if !function.return_type.is_void() {
            if function.return_type.is_pointer() {
                self.fail(format!(
                    "Compute kernel {}() cannot return a pointer type: '{}'",
                    function.name,
                    function.return_type.spelling(self.unit)
                ));
            }
            self.roles.has_return = true;
        }

        for param in &function.params {
            if param.ty.is_pointer() {
                let message = format!(
                    "Compute kernel {}() cannot have parameter '{}' of pointer type: '{}'",
                    function.name,
                    param.name,
                    param.ty.spelling(self.unit)
                );
                self.fail_at(param, message);
            }
        }
        if !self.valid {
            return false;
        }

        let mut index = 0;
        if let Some(first) = function.params.first() {
            let is_index = first.ty.is_builtin(BuiltinKind::UInt)
                && (first.name == "x" || first.name == "y");
            if !is_index {
                self.roles.input = Some(0);
                index = 1;
            }
        }

        if self.roles.input.is_none() && !self.roles.has_return {
            self.fail(format!(
                "Compute kernel {}() must have at least one input parameter or a non-void return type",
                function.name
            ));
        }

        self.assign_xy(index);
        self.valid
    }

    fn assign_xy(&mut self, start: usize) {
        let function = self.function;
        for (index, param) in function.params.iter().enumerate().skip(start) {
            if !param.ty.is_builtin(BuiltinKind::UInt) {
                self.unexpected(param);
                continue;
            }
            let x_after_y = format!(
                "In compute kernel {}(), parameter 'x' cannot appear after the 'y' parameter",
                function.name
            );
            match param.name.as_str() {
                "x" => {
                    if self.roles.x.is_some() {
                        self.fail_at(param, format!("Duplicate parameter entry (by name) '{}'", param.name));
                    } else if self.roles.y.is_some() {
                        self.fail_at(param, x_after_y);
                    } else {
                        self.roles.x = Some(index);
                    }
                }
                "y" => {
                    if self.roles.y.is_some() {
                        self.fail_at(param, format!("Duplicate parameter entry (by name) '{}'", param.name));
                    } else {
                        self.roles.y = Some(index);
                    }
                }
                _ => match (self.roles.x, self.roles.y) {
                    (None, None) => self.roles.x = Some(index),
                    (None, Some(_)) => self.unexpected(param),
                    (Some(_), None) => self.roles.y = Some(index),
                    (Some(_), Some(_)) => self.unexpected(param),
                },
            }
        }
    }
}

/// Assigns parameter roles for a compute kernel. Returns `None` after
/// reporting when the signature is not legal at `api`.
pub fn resolve_roles(
    unit: &TranslationUnit,
    function: &FunctionDecl,
    api: ApiLevel,
    diagnostics: &mut Diagnostics,
) -> Option<KernelRoles> {
    let mut resolver = RoleResolver {
        unit,
        function,
        roles: KernelRoles::default(),
        valid: true,
        diagnostics,
    };

    if api < ApiLevel::JB && function.name != ROOT_NAME {
        resolver.fail(format!(
            "Non-root compute kernel {}() is not supported in SDK levels 11-{}",
            function.name,
            ApiLevel::ICS_MR1
        ));
    }

    if function.kernel_attr {
        if !resolver.resolve_pass_by_value(api) {
            return None;
        }
    } else {
        resolver.resolve_legacy();
        if resolver.valid && api < ApiLevel::ICS && !resolver.roles.signature().is_legacy_shape() {
            resolver.fail(format!(
                "Compute kernel {}() targeting SDK levels 11-{} may not skip parameters",
                function.name,
                ApiLevel::HC_MR2
            ));
        }
    }

    if resolver.valid {
        tracing::debug!(
            kernel = %function.name,
            signature = %resolver.roles.signature(),
            "resolved kernel roles"
        );
        Some(resolver.roles)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{QualType, UnitBuilder};

    fn unit() -> TranslationUnit {
        UnitBuilder::new("k.rs").build()
    }

    fn in_ptr() -> QualType {
        QualType::pointer_to(QualType::int().as_const())
    }

    fn out_ptr() -> QualType {
        QualType::pointer_to(QualType::int())
    }

    fn resolve(function: &FunctionDecl, api: ApiLevel) -> (Option<KernelRoles>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let roles = resolve_roles(&unit(), function, api, &mut diags);
        (roles, diags)
    }

    #[test]
    fn test_classify() {
        let api = ApiLevel::MAX;
        let graphics = FunctionDecl::new("root", QualType::int());
        assert_eq!(classify(&graphics, api), FunctionClass::GraphicsRoot);

        let legacy_graphics = FunctionDecl::new("root", QualType::int()).param("launch", QualType::int());
        assert_eq!(classify(&legacy_graphics, ApiLevel::HC), FunctionClass::GraphicsRoot);
        assert_eq!(classify(&legacy_graphics, ApiLevel::ICS), FunctionClass::ForEach);

        let kernel_root = FunctionDecl::new("root", QualType::void()).kernel();
        assert_eq!(classify(&kernel_root, api), FunctionClass::ForEach);

        let init = FunctionDecl::new("init", QualType::void());
        assert_eq!(classify(&init, api), FunctionClass::Init);

        let foreach = FunctionDecl::new("blur", QualType::void()).param("in", in_ptr());
        assert_eq!(classify(&foreach, api), FunctionClass::ForEach);

        let invokable = FunctionDecl::new("setGain", QualType::void()).param("g", QualType::float());
        assert_eq!(classify(&invokable, api), FunctionClass::Invokable);
    }

    #[test]
    fn test_special_functions() {
        let mut diags = Diagnostics::new();
        let bad_init = FunctionDecl::new("init", QualType::int()).param("a", QualType::int());
        assert!(!validate_special_function(&unit(), &bad_init, FunctionClass::Init, &mut diags));
        let messages: Vec<_> = diags.entries().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "init(void) is required to have no parameters",
                "init(void) is required to have a void return type"
            ]
        );

        let mut diags = Diagnostics::new();
        let void_root = FunctionDecl::new("root", QualType::void());
        assert!(!validate_special_function(
            &unit(),
            &void_root,
            FunctionClass::GraphicsRoot,
            &mut diags
        ));
        assert_eq!(
            diags.entries()[0].message,
            "root() is required to return an int for graphics usage"
        );
    }

    #[test]
    fn test_legacy_in_out_x_y() {
        let function = FunctionDecl::new("root", QualType::void())
            .param("in", in_ptr())
            .param("out", out_ptr())
            .param("data", QualType::pointer_to(QualType::float().as_const()))
            .param("a", QualType::uint())
            .param("b", QualType::uint());
        let (roles, diags) = resolve(&function, ApiLevel::HC);
        assert!(diags.is_empty(), "{}", diags);
        let roles = roles.unwrap();
        assert_eq!(roles.input, Some(0));
        assert_eq!(roles.output, Some(1));
        assert_eq!(roles.usr_data, Some(2));
        assert_eq!(roles.x, Some(3));
        assert_eq!(roles.y, Some(4));
        assert_eq!(roles.signature().bits(), 0x1f);
    }

    #[test]
    fn test_names_win_over_position() {
        let function = FunctionDecl::new("root", QualType::void())
            .param("out", out_ptr())
            .param("y", QualType::uint());
        let (roles, _) = resolve(&function, ApiLevel::MAX);
        let roles = roles.unwrap();
        assert_eq!(roles.x, None);
        assert_eq!(roles.y, Some(1));
        assert_eq!(roles.signature(), Signature::OUT | Signature::Y);
    }

    #[test]
    fn test_x_after_y_and_duplicates() {
        let function = FunctionDecl::new("root", QualType::void())
            .param("in", in_ptr())
            .param("y", QualType::uint())
            .param("x", QualType::uint());
        let (roles, diags) = resolve(&function, ApiLevel::MAX);
        assert!(roles.is_none());
        assert_eq!(
            diags.entries()[0].message,
            "In compute kernel root(), parameter 'x' cannot appear after the 'y' parameter"
        );

        let function = FunctionDecl::new("root", QualType::void())
            .param("in", in_ptr())
            .param("x", QualType::uint())
            .param("x", QualType::uint());
        let (_, diags) = resolve(&function, ApiLevel::MAX);
        assert_eq!(diags.entries()[0].message, "Duplicate parameter entry (by name) 'x'");
    }

    #[test]
    fn test_each_legacy_shape_before_ics() {
        let params = [
            ("in", in_ptr()),
            ("out", out_ptr()),
            ("data", QualType::pointer_to(QualType::float().as_const())),
            ("a", QualType::uint()),
            ("b", QualType::uint()),
        ];
        let expected = [0x01, 0x03, 0x07, 0x0f, 0x1f];
        for (count, bits) in (1..=params.len()).zip(expected) {
            let function = params[..count]
                .iter()
                .fold(FunctionDecl::new("root", QualType::void()), |f, (name, ty)| {
                    f.param(*name, ty.clone())
                });
            let (roles, diags) = resolve(&function, ApiLevel::HC);
            assert!(diags.is_empty(), "{} params: {}", count, diags);
            assert_eq!(roles.unwrap().signature().bits(), bits);
        }
    }

    #[test]
    fn test_gapped_shapes_rejected_before_ics() {
        let out_only = FunctionDecl::new("root", QualType::void()).param("out", out_ptr());
        let in_and_data = FunctionDecl::new("root", QualType::void())
            .param("in", in_ptr())
            .param("data", QualType::pointer_to(QualType::float().as_const()));

        for (function, bits) in [(out_only, 0x02), (in_and_data, 0x05)] {
            let (roles, diags) = resolve(&function, ApiLevel::HC);
            assert!(roles.is_none());
            assert_eq!(
                diags.entries()[0].message,
                "Compute kernel root() targeting SDK levels 11-13 may not skip parameters"
            );
            let (roles, diags) = resolve(&function, ApiLevel::ICS);
            assert!(diags.is_empty(), "{}", diags);
            assert_eq!(roles.unwrap().signature().bits(), bits);
        }
    }

    #[test]
    fn test_unnamed_index_after_y() {
        let function = FunctionDecl::new("root", QualType::void())
            .param("in", in_ptr())
            .param("y", QualType::uint())
            .param("col", QualType::uint());
        let (roles, diags) = resolve(&function, ApiLevel::MAX);
        assert!(roles.is_none());
        assert_eq!(
            diags.entries()[0].message,
            "Unexpected kernel root() parameter 'col' of type 'unsigned int'"
        );
    }

    #[test]
    fn test_legacy_requires_in_or_out_and_void_return() {
        let function = FunctionDecl::new("root", QualType::int()).param("x", QualType::uint());
        let (roles, diags) = resolve(&function, ApiLevel::MAX);
        assert!(roles.is_none());
        let messages: Vec<_> = diags.entries().iter().map(|d| d.message.clone()).collect();
        assert!(messages.contains(&"Compute kernel root() is required to return a void type".to_string()));
        assert!(messages
            .contains(&"Compute kernel root() must have at least one parameter for in or out".to_string()));
    }

    #[test]
    fn test_unexpected_parameter_type() {
        let function = FunctionDecl::new("root", QualType::void())
            .param("in", in_ptr())
            .param("scale", QualType::float());
        let (_, diags) = resolve(&function, ApiLevel::MAX);
        assert_eq!(
            diags.entries()[0].message,
            "Unexpected kernel root() parameter 'scale' of type 'float'"
        );
    }

    #[test]
    fn test_skipped_roles_before_ics() {
        let function = FunctionDecl::new("root", QualType::void())
            .param("in", in_ptr())
            .param("x", QualType::uint());
        let (roles, diags) = resolve(&function, ApiLevel::HC_MR2);
        assert!(roles.is_none());
        assert_eq!(
            diags.entries()[0].message,
            "Compute kernel root() targeting SDK levels 11-13 may not skip parameters"
        );
        let (roles, _) = resolve(&function, ApiLevel::ICS);
        assert_eq!(roles.unwrap().signature().bits(), 0x09);
    }

    #[test]
    fn test_non_root_kernels_before_jb() {
        let function = FunctionDecl::new("blur", QualType::void()).param("in", in_ptr());
        let (roles, diags) = resolve(&function, ApiLevel::ICS_MR1);
        assert!(roles.is_none());
        assert_eq!(
            diags.entries()[0].message,
            "Non-root compute kernel blur() is not supported in SDK levels 11-15"
        );
        assert!(resolve(&function, ApiLevel::JB).0.is_some());
    }

    #[test]
    fn test_pass_by_value() {
        let function = FunctionDecl::new("invert", QualType::vector(BuiltinKind::UChar, 4))
            .kernel()
            .param("in", QualType::vector(BuiltinKind::UChar, 4))
            .param("x", QualType::uint());
        let (roles, diags) = resolve(&function, ApiLevel::JB);
        assert!(roles.is_none());
        assert_eq!(
            diags.entries()[0].message,
            "Compute kernel invert() targeting SDK levels 11-16 may not use pass-by-value with __attribute__((kernel))"
        );

        let (roles, diags) = resolve(&function, ApiLevel::JB_MR1);
        assert!(diags.is_empty());
        let roles = roles.unwrap();
        assert!(roles.pass_by_value && roles.has_return);
        assert_eq!(roles.signature().bits(), 0x20 | 0x08 | 0x02 | 0x01);
    }

    #[test]
    fn test_pass_by_value_index_only() {
        let function = FunctionDecl::new("fill", QualType::float())
            .kernel()
            .param("x", QualType::uint())
            .param("y", QualType::uint());
        let (roles, _) = resolve(&function, ApiLevel::MAX);
        let roles = roles.unwrap();
        assert_eq!(roles.input, None);
        assert_eq!((roles.x, roles.y), (Some(0), Some(1)));

        let nothing = FunctionDecl::new("noop", QualType::void())
            .kernel()
            .param("x", QualType::uint());
        let (roles, diags) = resolve(&nothing, ApiLevel::MAX);
        assert!(roles.is_none());
        assert_eq!(
            diags.entries()[0].message,
            "Compute kernel noop() must have at least one input parameter or a non-void return type"
        );
    }

    #[test]
    fn test_pass_by_value_rejects_pointers() {
        let function = FunctionDecl::new("k", QualType::void())
            .kernel()
            .param("in", in_ptr());
        let (roles, diags) = resolve(&function, ApiLevel::MAX);
        assert!(roles.is_none());
        assert_eq!(
            diags.entries()[0].message,
            "Compute kernel k() cannot have parameter 'in' of pointer type: 'const int *'"
        );
    }
}
