//! Memoized scene pipelines

use crate::backend::{BackendResult, RenderPipelineHandle};
use crate::error::{RenderError, RenderResult};
use crate::layout::LayoutId;
use crate::resources::MaterialVariant;
use rustc_hash::FxHashMap;
use std::fmt;

/// Everything a scene pipeline depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineKey {
    pub layout: LayoutId,
    pub variant: MaterialVariant,
    pub skinned: bool,
}

impl PipelineKey {
    pub fn new(layout: LayoutId, variant: MaterialVariant, skinned: bool) -> Self {
        Self {
            layout,
            variant,
            skinned,
        }
    }
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/variant {}", self.layout, self.variant)?;
        if self.skinned {
            write!(f, "/skinned")?;
        }
        Ok(())
    }
}

/// Compiled pipelines by key. Failed compilations are not cached, so a
/// later frame retries them.
#[derive(Debug, Default)]
pub struct PipelineCache {
    pipelines: FxHashMap<PipelineKey, RenderPipelineHandle>,
    compile_count: usize,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PipelineKey) -> Option<RenderPipelineHandle> {
        self.pipelines.get(key).copied()
    }

    /// Return the cached pipeline for `key` or compile it with `compile`
    pub fn get_or_create(
        &mut self,
        key: PipelineKey,
        compile: impl FnOnce() -> BackendResult<RenderPipelineHandle>,
    ) -> RenderResult<RenderPipelineHandle> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(*pipeline);
        }

        self.compile_count += 1;
        let pipeline = compile().map_err(|source| RenderError::PipelineCompilation { key, source })?;
        log::debug!("Compiled pipeline {key}");
        self.pipelines.insert(key, pipeline);
        Ok(pipeline)
    }

    /// Number of compilation attempts, successful or not
    pub fn compile_count(&self) -> usize {
        self.compile_count
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
