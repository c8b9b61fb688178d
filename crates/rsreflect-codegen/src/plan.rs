//! Everything a binding generator needs for one script, numbered by slot

use std::path::Path;

use rsreflect_core::export::InitValue;
use rsreflect_core::types::{TypeClass, TypeId};
use rsreflect_core::{ApiLevel, ExportContext};
use serde::Serialize;

use crate::element::{element_layout, ElementEntry};
use crate::error::CodegenError;
use crate::java::{builtin_element_construct, host_type_name, null_value, record_class_name};

pub const SCRIPT_CLASS_PREFIX: &str = "ScriptC_";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarSlot {
    pub slot: usize,
    pub name: String,
    pub host_type: String,
    pub null_value: &'static str,
    pub is_const: bool,
    pub is_unsigned: bool,
    pub init: Option<InitValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSlot {
    pub name: String,
    pub host_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FuncSlot {
    pub slot: usize,
    pub name: String,
    pub params: Vec<ParamSlot>,
    /// Bytes of the packed parameter record
    pub packet_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelSlot {
    pub slot: usize,
    pub name: String,
    pub signature: u32,
    pub in_element: Option<String>,
    pub out_element: Option<String>,
    pub usr_data: Option<String>,
    /// Placeholder root: numbered but never generated
    pub skip_generation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordPlan {
    pub name: String,
    pub class_name: String,
    pub alloc_size: usize,
    pub elements: Vec<ElementEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReflectionPlan {
    pub script: String,
    pub class_name: String,
    pub package: String,
    pub license: Option<String>,
    pub api: ApiLevel,
    pub vars: Vec<VarSlot>,
    pub funcs: Vec<FuncSlot>,
    pub kernels: Vec<KernelSlot>,
    pub records: Vec<RecordPlan>,
}

/// `ScriptC_<basename>` for a script path.
pub fn script_class_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    format!("{}{}", SCRIPT_CLASS_PREFIX, stem)
}

fn element_name(context: &ExportContext, id: Option<TypeId>) -> Option<String> {
    let arena = context.arena();
    id.and_then(|id| match arena.class(id) {
        TypeClass::Record => Some(record_class_name(arena.name(id))),
        _ => builtin_element_construct(arena, id),
    })
}

impl ReflectionPlan {
    pub fn build(context: &ExportContext) -> Result<Self, CodegenError> {
        let arena = context.arena();
        let metadata = context.metadata();
        let package = metadata
            .package_name
            .clone()
            .ok_or_else(|| CodegenError::MissingPackage(context.file_name().to_string()))?;

        let vars = context
            .vars()
            .iter()
            .enumerate()
            .map(|(slot, var)| {
                Ok(VarSlot {
                    slot,
                    name: var.name.clone(),
                    host_type: host_type_name(arena, var.ty)?,
                    null_value: null_value(arena, var.ty),
                    is_const: var.is_const,
                    is_unsigned: var.is_unsigned,
                    init: var.init.clone(),
                })
            })
            .collect::<Result<Vec<_>, CodegenError>>()?;

        let funcs = context
            .funcs()
            .iter()
            .enumerate()
            .map(|(slot, func)| {
                let params = func
                    .params
                    .iter()
                    .map(|p| {
                        Ok(ParamSlot {
                            name: p.name.clone(),
                            host_type: host_type_name(arena, p.ty)?,
                        })
                    })
                    .collect::<Result<Vec<_>, CodegenError>>()?;
                Ok(FuncSlot {
                    slot,
                    name: func.name.clone(),
                    params,
                    packet_size: func.packet.map(|p| arena.alloc_size(p)).unwrap_or(0),
                })
            })
            .collect::<Result<Vec<_>, CodegenError>>()?;

        let kernels = context
            .foreach()
            .iter()
            .enumerate()
            .map(|(slot, kernel)| KernelSlot {
                slot,
                name: kernel.name.clone(),
                signature: kernel.signature.bits(),
                in_element: element_name(context, kernel.in_type),
                out_element: element_name(context, kernel.out_type),
                usr_data: kernel.param_packet.map(|p| arena.name(p).to_string()),
                skip_generation: kernel.is_dummy_root,
            })
            .collect();

        let mut records = Vec::new();
        for (name, id) in context.export_types() {
            let node = arena.get(id);
            if node.class() != TypeClass::Record || node.is_artificial() {
                continue;
            }
            records.push(RecordPlan {
                name: name.to_string(),
                class_name: record_class_name(name),
                alloc_size: arena.alloc_size(id),
                elements: element_layout(arena, id, context.options().api)
                    .map_err(|err| err.in_script(context.file_name()))?,
            });
        }

        tracing::debug!(
            script = %context.file_name(),
            vars = vars.len(),
            records = records.len(),
            "built reflection plan"
        );
        Ok(ReflectionPlan {
            script: context.file_name().to_string(),
            class_name: script_class_name(context.file_name()),
            package,
            license: metadata.license.clone(),
            api: context.options().api,
            vars,
            funcs,
            kernels,
            records,
        })
    }

    pub fn to_json(&self) -> Result<String, CodegenError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
