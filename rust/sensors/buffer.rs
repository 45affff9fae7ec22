/// Fixed-capacity vertex and color storage that decoders stream into.
///
/// Capacity is chosen when the stream is set up and never changes: writes
/// past it are dropped. Each decoded message restarts from index 0 and
/// `draw_count` records how many vertices are valid.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingPointBuffer {
    positions: Vec<f32>,
    colors: Option<Vec<f32>>,
    draw_count: usize,
    capacity: usize,
    dirty: bool,
}

impl StreamingPointBuffer {
    pub fn new(capacity: usize, with_colors: bool) -> Self {
        Self {
            positions: vec![0.0; capacity * 3],
            colors: with_colors.then(|| vec![0.0; capacity * 3]),
            draw_count: 0,
            capacity,
            dirty: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn draw_count(&self) -> usize {
        self.draw_count
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.draw_count >= self.capacity
    }

    /// Starts a new message; previous contents are overwritten in place.
    pub fn begin(&mut self) {
        self.draw_count = 0;
    }

    /// Appends one vertex. Returns `false`, writing nothing, when full.
    ///
    /// `color` is ignored when the buffer was set up without colors.
    pub fn push(&mut self, position: [f32; 3], color: Option<[f32; 3]>) -> bool {
        if self.is_full() {
            return false;
        }
        let base = self.draw_count * 3;
        self.positions[base..base + 3].copy_from_slice(&position);
        if let (Some(colors), Some(color)) = (self.colors.as_mut(), color) {
            colors[base..base + 3].copy_from_slice(&color);
        }
        self.draw_count += 1;
        true
    }

    /// Ends the message and flags the buffer for upload on the next render.
    pub fn finish(&mut self) -> usize {
        self.dirty = true;
        self.draw_count
    }

    pub fn positions(&self) -> &[f32] {
        &self.positions[..self.draw_count * 3]
    }

    pub fn colors(&self) -> Option<&[f32]> {
        self.colors
            .as_deref()
            .map(|colors| &colors[..self.draw_count * 3])
    }

    pub fn position(&self, index: usize) -> Option<[f32; 3]> {
        (index < self.draw_count).then(|| {
            let base = index * 3;
            [
                self.positions[base],
                self.positions[base + 1],
                self.positions[base + 2],
            ]
        })
    }

    pub fn color(&self, index: usize) -> Option<[f32; 3]> {
        let colors = self.colors.as_ref()?;
        (index < self.draw_count).then(|| {
            let base = index * 3;
            [colors[base], colors[base + 1], colors[base + 2]]
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Called by the render pass once the contents were uploaded.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_past_capacity_are_dropped() {
        let mut buffer = StreamingPointBuffer::new(2, false);
        buffer.begin();
        assert!(buffer.push([1.0, 2.0, 3.0], None));
        assert!(buffer.push([4.0, 5.0, 6.0], Some([1.0, 0.0, 0.0])));
        assert!(!buffer.push([7.0, 8.0, 9.0], None));
        assert_eq!(buffer.finish(), 2);
        assert_eq!(buffer.positions(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(buffer.colors().is_none());
    }

    #[test]
    fn begin_rewinds_without_reallocating() {
        let mut buffer = StreamingPointBuffer::new(4, true);
        buffer.begin();
        for i in 0..4 {
            buffer.push([i as f32; 3], Some([0.5; 3]));
        }
        buffer.finish();
        assert!(buffer.take_dirty());
        assert!(!buffer.is_dirty());

        buffer.begin();
        buffer.push([9.0; 3], Some([1.0; 3]));
        buffer.finish();
        assert_eq!(buffer.draw_count(), 1);
        assert_eq!(buffer.capacity(), 4);
        assert_eq!(buffer.color(0), Some([1.0; 3]));
        assert_eq!(buffer.position(1), None);
    }
}
