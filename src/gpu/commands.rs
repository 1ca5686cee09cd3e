use super::{BufferHandle, DescriptorSetHandle, PipelineHandle, PipelineLayoutHandle};

/// Recording side of the GPU command layer
pub trait CommandRecorder {
    fn bind_pipeline(&mut self, pipeline: PipelineHandle);
    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);
    fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64);
    fn bind_descriptor_set(
        &mut self,
        layout: PipelineLayoutHandle,
        index: u32,
        set: DescriptorSetHandle,
    );
    fn push_constants(&mut self, layout: PipelineLayoutHandle, offset: u32, data: &[u8]);
    fn draw(&mut self, vertex_count: u32, instance_count: u32);
    fn draw_indexed(&mut self, index_count: u32, instance_count: u32);
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BindPipeline(PipelineHandle),
    BindVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    BindDescriptorSet {
        layout: PipelineLayoutHandle,
        index: u32,
        set: DescriptorSetHandle,
    },
    PushConstants {
        layout: PipelineLayoutHandle,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
}

/// A command buffer that just remembers what was recorded.
///
/// Used by headless runs and tests; a real backend replays it or records
/// straight into its own encoder.
#[derive(Debug, Default, Clone)]
pub struct CommandList {
    commands: Vec<RecordedCommand>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of draw calls of either kind
    pub fn draw_calls(&self) -> usize {
        self.commands
            .iter()
            .filter(|cmd| {
                matches!(
                    cmd,
                    RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
                )
            })
            .count()
    }

    pub fn pipeline_binds(&self) -> usize {
        self.commands
            .iter()
            .filter(|cmd| matches!(cmd, RecordedCommand::BindPipeline(_)))
            .count()
    }
}

impl CommandRecorder for CommandList {
    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.commands.push(RecordedCommand::BindVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        self.commands
            .push(RecordedCommand::BindIndexBuffer { buffer, offset });
    }

    fn bind_descriptor_set(
        &mut self,
        layout: PipelineLayoutHandle,
        index: u32,
        set: DescriptorSetHandle,
    ) {
        self.commands.push(RecordedCommand::BindDescriptorSet { layout, index, set });
    }

    fn push_constants(&mut self, layout: PipelineLayoutHandle, offset: u32, data: &[u8]) {
        self.commands.push(RecordedCommand::PushConstants {
            layout,
            offset,
            data: data.to_vec(),
        });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.commands.push(RecordedCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        self.commands.push(RecordedCommand::DrawIndexed {
            index_count,
            instance_count,
        });
    }
}
