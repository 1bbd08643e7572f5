pub mod change_detector;
pub mod change_mask;
pub mod chart;
pub mod image_loader;
pub mod overlay;
pub mod severity;

pub mod utils {
    pub mod image_helper;
}
