//! WGSL front end.
//!
//! Sources are parsed and validated with naga before any pipeline is created,
//! so malformed kernels surface as [`AccelError::ShaderCompile`] instead of a
//! device validation panic.

use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::error::{AccelError, Result};

pub const ENTRY_POINT: &str = "main";

/// A validated shader module.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub label: String,
    pub source: String,
    pub module: naga::Module,
    pub workgroup_size: [u32; 3],
}

pub trait ShaderCompiler: Send + Sync {
    fn compile(
        &self,
        label: &str,
        source: &str,
        stage: naga::ShaderStage,
    ) -> Result<CompiledShader>;
}

#[derive(Debug, Clone)]
pub struct NagaCompiler {
    flags: ValidationFlags,
    capabilities: Capabilities,
}

impl Default for NagaCompiler {
    fn default() -> Self {
        Self {
            flags: ValidationFlags::all(),
            capabilities: Capabilities::all(),
        }
    }
}

impl NagaCompiler {
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }
}

impl ShaderCompiler for NagaCompiler {
    fn compile(
        &self,
        label: &str,
        source: &str,
        stage: naga::ShaderStage,
    ) -> Result<CompiledShader> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| AccelError::shader_compile(label, format!("parse: {e}")))?;
        Validator::new(self.flags, self.capabilities)
            .validate(&module)
            .map_err(|e| AccelError::shader_compile(label, format!("validate: {e}")))?;
        let entry = module
            .entry_points
            .iter()
            .find(|ep| ep.name == ENTRY_POINT && ep.stage == stage)
            .ok_or_else(|| {
                AccelError::shader_compile(
                    label,
                    format!("module has no {stage:?} entry point named '{ENTRY_POINT}'"),
                )
            })?;
        let workgroup_size = entry.workgroup_size;
        log::debug!(
            "compiled '{}' ({} bytes, workgroup {:?})",
            label,
            source.len(),
            workgroup_size
        );
        Ok(CompiledShader {
            label: label.to_string(),
            source: source.to_string(),
            module,
            workgroup_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIVIAL: &str = r#"
@group(0) @binding(0) var<storage, read_write> values: array<u32>;
@compute @workgroup_size(4, 2, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    values[gid.x] = gid.x;
}
"#;

    #[test]
    fn reports_workgroup_size() {
        let shader = NagaCompiler::default()
            .compile("trivial", TRIVIAL, naga::ShaderStage::Compute)
            .unwrap();
        assert_eq!(shader.workgroup_size, [4, 2, 1]);
        assert_eq!(shader.label, "trivial");
    }

    #[test]
    fn syntax_errors_are_compile_errors() {
        let err = NagaCompiler::default()
            .compile("broken", "fn main( {", naga::ShaderStage::Compute)
            .unwrap_err();
        assert_eq!(err.kind(), "shader-compile");
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn missing_entry_point_is_an_error() {
        let src = TRIVIAL.replace("fn main", "fn other");
        let err = NagaCompiler::default()
            .compile("renamed", &src, naga::ShaderStage::Compute)
            .unwrap_err();
        assert!(err.to_string().contains("entry point"));
    }

    #[test]
    fn type_errors_fail_validation() {
        let src = TRIVIAL.replace("values[gid.x] = gid.x;", "values[gid.x] = 1.5;");
        assert!(NagaCompiler::default()
            .compile("typed", &src, naga::ShaderStage::Compute)
            .is_err());
    }
}
