//! ### English
//! Strategies for moving canvas bytes into a surface's transfer buffer.
//!
//! ### 中文
//! 将画布字节写入表面传输缓冲的策略。

use crate::engine::canvas::Canvas;
use crate::engine::config::TransferMode;
use crate::engine::gpu::{BufferId, BufferMode, GpuBackend, GpuError};

/// ### English
/// Transfer buffer lifetime policy shared by every surface of one renderer.
///
/// ### 中文
/// 同一渲染器所有表面共享的传输缓冲生命周期策略。
pub trait TransferStrategy: Send + Sync {
    /// ### English
    /// Number of surfaces the ring needs under this strategy.
    ///
    /// ### 中文
    /// 该策略下环所需的表面数量。
    fn ring_size(&self) -> usize;

    fn buffer_mode(&self) -> BufferMode;

    /// ### English
    /// Writes the whole canvas into `buffer`.
    ///
    /// ### 中文
    /// 将整个画布写入 `buffer`。
    fn stage(&self, gpu: &dyn GpuBackend, buffer: BufferId, canvas: &Canvas)
    -> Result<(), GpuError>;
}

/// ### English
/// Two surfaces; the buffer is re-specified before every write so the driver can hand out fresh
/// storage while an older apply is still reading the previous contents.
///
/// ### 中文
/// 两个表面；每次写入前重新指定缓冲存储，使驱动在旧的 apply 仍在读取时能分配新存储。
pub struct OrphanedTransfer;

impl TransferStrategy for OrphanedTransfer {
    fn ring_size(&self) -> usize {
        2
    }

    fn buffer_mode(&self) -> BufferMode {
        BufferMode::Stream
    }

    fn stage(
        &self,
        gpu: &dyn GpuBackend,
        buffer: BufferId,
        canvas: &Canvas,
    ) -> Result<(), GpuError> {
        gpu.write_transfer_buffer(buffer, BufferMode::Stream, canvas.data())
    }
}

/// ### English
/// Three surfaces; each buffer stays mapped for its whole lifetime and is written in place.
/// The spare slot keeps the worker from writing a buffer the presenter may still apply from.
///
/// ### 中文
/// 三个表面；每个缓冲在整个生命周期内保持映射并原地写入。
/// 额外的槽位避免工作线程写入呈现器可能仍在 apply 的缓冲。
pub struct CoherentTransfer;

impl TransferStrategy for CoherentTransfer {
    fn ring_size(&self) -> usize {
        3
    }

    fn buffer_mode(&self) -> BufferMode {
        BufferMode::Coherent
    }

    fn stage(
        &self,
        gpu: &dyn GpuBackend,
        buffer: BufferId,
        canvas: &Canvas,
    ) -> Result<(), GpuError> {
        gpu.write_transfer_buffer(buffer, BufferMode::Coherent, canvas.data())
    }
}

/// ### English
/// Resolves `mode` against what `gpu` supports. `Coherent` degrades to orphaned transfers when the
/// backend cannot map buffers persistently.
///
/// ### 中文
/// 根据 `gpu` 的能力解析 `mode`。若后端无法持久映射缓冲，`Coherent` 会降级为 orphan 传输。
pub fn select_strategy(mode: TransferMode, gpu: &dyn GpuBackend) -> Box<dyn TransferStrategy> {
    let supported = gpu.supports_coherent_mapping();
    let coherent = match mode {
        TransferMode::Auto => supported,
        TransferMode::Orphaned => false,
        TransferMode::Coherent if !supported => {
            log::warn!("coherent transfers requested but unsupported by the backend; orphaning");
            false
        }
        TransferMode::Coherent => true,
    };
    if coherent {
        Box::new(CoherentTransfer)
    } else {
        Box::new(OrphanedTransfer)
    }
}
