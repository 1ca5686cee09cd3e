use super::RendererResult;
use crate::camera::TerrainCamera;
use crate::gpu::CommandRecorder;
use crate::tile::TileBounds;

/// Anything a scene can step, draw and bound
pub trait SceneObject: Send {
    fn update(&mut self, dt: f32);
    fn render(&mut self, recorder: &mut dyn CommandRecorder, camera: &TerrainCamera)
        -> RendererResult<()>;
    fn bounding_box(&self) -> TileBounds;
}

/// Ordered list of scene objects drawn back to back
#[derive(Default)]
pub struct Scene {
    objects: Vec<Box<dyn SceneObject>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: Box<dyn SceneObject>) {
        self.objects.push(object);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn update(&mut self, dt: f32) {
        for object in &mut self.objects {
            object.update(dt);
        }
    }

    /// Draw every object; the first failure is returned after all have drawn
    pub fn render(
        &mut self,
        recorder: &mut dyn CommandRecorder,
        camera: &TerrainCamera,
    ) -> RendererResult<()> {
        let mut first_error = None;
        for object in &mut self.objects {
            if let Err(e) = object.render(recorder, camera) {
                log::warn!("[Scene] Object failed to render: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn bounding_box(&self) -> Option<TileBounds> {
        self.objects
            .iter()
            .map(|object| object.bounding_box())
            .reduce(|a, b| a.union(&b))
    }
}
