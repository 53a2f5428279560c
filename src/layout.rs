//! Three-panel resizable layout arithmetic.
//!
//! Two draggable dividers set the left and right panel pixel widths
//! inside a fixed-width container; the center panel takes the remainder.
//! Each drag clamps its panel to a configured minimum and bounds its
//! maximum so the center panel can never be crushed below its own
//! minimum. Widths persist per named layout key; the resize lock is
//! released unconditionally on pointer-up, wherever the pointer ends up.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::{get_typed, set_typed, KvStore};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelSizes {
    pub left: f64,
    pub right: f64,
}

/// Static layout constraints.
#[derive(Debug, Clone, Copy)]
pub struct PanelConfig {
    pub divider_width: f64,
    pub min_left: f64,
    pub min_center: f64,
    pub min_right: f64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            divider_width: 6.0,
            min_left: 220.0,
            min_center: 360.0,
            min_right: 260.0,
        }
    }
}

pub struct PanelLayout {
    config: PanelConfig,
    container_width: f64,
    sizes: PanelSizes,
    resizing: bool,
    store: Option<Arc<dyn KvStore>>,
    key: Option<String>,
}

impl PanelLayout {
    pub fn new(config: PanelConfig, container_width: f64, initial: PanelSizes) -> Self {
        let mut layout = Self {
            config,
            container_width,
            sizes: initial,
            resizing: false,
            store: None,
            key: None,
        };
        layout.reclamp();
        layout
    }

    /// Restore persisted sizes for a named layout, falling back to
    /// `initial`. Persisted widths from a larger window are re-clamped
    /// against the live container width.
    pub fn restore(
        config: PanelConfig,
        container_width: f64,
        initial: PanelSizes,
        store: Arc<dyn KvStore>,
        key: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let sizes = get_typed(store.as_ref(), &key).unwrap_or(initial);
        let mut layout = Self::new(config, container_width, sizes);
        layout.store = Some(store);
        layout.key = Some(key);
        layout
    }

    pub fn sizes(&self) -> PanelSizes {
        self.sizes
    }

    pub fn is_resizing(&self) -> bool {
        self.resizing
    }

    /// Width left over for the center panel.
    pub fn center_width(&self) -> f64 {
        self.container_width - 2.0 * self.config.divider_width - self.sizes.left - self.sizes.right
    }

    /// The container was resized; re-clamp both panels against it.
    pub fn set_container_width(&mut self, width: f64) {
        self.container_width = width;
        self.reclamp();
    }

    /// Pointer-down on either divider: take the global resize lock
    /// (resizing cursor + selection lock in the UI layer).
    pub fn begin_resize(&mut self) {
        self.resizing = true;
    }

    /// Pointer-up, wherever the pointer is: release the lock
    /// unconditionally and persist the final sizes.
    pub fn end_resize(&mut self) {
        self.resizing = false;
        self.persist();
    }

    /// Drag the left divider to a requested left-panel width.
    pub fn drag_left(&mut self, requested: f64) {
        let max = self.max_left();
        self.sizes.left = requested.clamp(self.config.min_left, max);
    }

    /// Drag the right divider to a requested right-panel width.
    pub fn drag_right(&mut self, requested: f64) {
        let max = self.max_right();
        self.sizes.right = requested.clamp(self.config.min_right, max);
    }

    /// Largest width the left panel may take without crushing the center:
    /// `container − 2×divider − right − minCenter`.
    fn max_left(&self) -> f64 {
        (self.container_width
            - 2.0 * self.config.divider_width
            - self.sizes.right
            - self.config.min_center)
            .max(self.config.min_left)
    }

    fn max_right(&self) -> f64 {
        (self.container_width
            - 2.0 * self.config.divider_width
            - self.sizes.left
            - self.config.min_center)
            .max(self.config.min_right)
    }

    fn reclamp(&mut self) {
        self.sizes.left = self.sizes.left.clamp(self.config.min_left, self.max_left());
        self.sizes.right = self
            .sizes
            .right
            .clamp(self.config.min_right, self.max_right());
    }

    fn persist(&self) {
        if let (Some(store), Some(key)) = (&self.store, &self.key) {
            set_typed(store.as_ref(), key, &self.sizes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryStore;

    fn config() -> PanelConfig {
        PanelConfig {
            divider_width: 5.0,
            min_left: 200.0,
            min_center: 300.0,
            min_right: 200.0,
        }
    }

    #[test]
    fn test_drag_left_clamps_to_center_minimum() {
        let mut layout = PanelLayout::new(
            config(),
            1200.0,
            PanelSizes { left: 250.0, right: 300.0 },
        );

        layout.begin_resize();
        layout.drag_left(2000.0);

        // max = 1200 − 300(right) − 300(minCenter) − 2×5 = 590
        assert_eq!(layout.sizes().left, 590.0);
        assert!(layout.center_width() >= 300.0);
        layout.end_resize();
    }

    #[test]
    fn test_drag_below_minimum_clamps_up() {
        let mut layout = PanelLayout::new(
            config(),
            1200.0,
            PanelSizes { left: 250.0, right: 300.0 },
        );
        layout.drag_left(50.0);
        assert_eq!(layout.sizes().left, 200.0);
    }

    #[test]
    fn test_resize_lock_released_on_pointer_up() {
        let mut layout = PanelLayout::new(
            config(),
            1200.0,
            PanelSizes { left: 250.0, right: 300.0 },
        );
        layout.begin_resize();
        assert!(layout.is_resizing());
        // Pointer released outside the container — lock must still clear
        layout.end_resize();
        assert!(!layout.is_resizing());
    }

    #[test]
    fn test_sizes_persist_per_layout_key() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let initial = PanelSizes { left: 250.0, right: 300.0 };

        let mut layout = PanelLayout::restore(
            config(),
            1200.0,
            initial,
            Arc::clone(&store),
            "crm",
        );
        layout.begin_resize();
        layout.drag_left(320.0);
        layout.end_resize();

        let restored = PanelLayout::restore(config(), 1200.0, initial, store, "crm");
        assert_eq!(restored.sizes().left, 320.0);
    }

    #[test]
    fn test_persisted_sizes_reclamped_for_smaller_container() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let initial = PanelSizes { left: 500.0, right: 400.0 };

        let mut layout = PanelLayout::restore(
            config(),
            1600.0,
            initial,
            Arc::clone(&store),
            "wide",
        );
        layout.end_resize(); // persist at the wide width

        // Same key restored into a much narrower window
        let narrow = PanelLayout::restore(config(), 1200.0, initial, store, "wide");
        assert!(narrow.center_width() >= 300.0);
        assert!(narrow.sizes().left >= 200.0);
        assert!(narrow.sizes().right >= 200.0);
    }

    #[test]
    fn test_container_shrink_reclamps_live_layout() {
        let mut layout = PanelLayout::new(
            config(),
            1600.0,
            PanelSizes { left: 600.0, right: 400.0 },
        );
        layout.set_container_width(1000.0);
        // left clamps first against the old right, then right against the
        // clamped left; the center keeps its minimum
        assert_eq!(layout.sizes().left, 290.0);
        assert_eq!(layout.sizes().right, 400.0);
        assert!(layout.center_width() >= 300.0);
    }
}
