use rizmo_common::Detection;

/// Dimensionless tracking errors, roughly in [-1, 1] for on-screen
/// targets. `x` and `y` share the image height as their scale.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackingErrors {
    /// Positive when the target is right of center.
    pub x: f64,
    /// Positive when the aim point is above center.
    pub y: f64,
    /// Negative when the target is farther away than desired.
    pub z: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorGeometry {
    /// Fraction of the image the target should fill.
    pub target_area: f64,
    pub person_anchor_fraction: f64,
    pub bottom_margin_px: f64,
}

pub fn compute_errors(target: &Detection, image_size: (u32, u32), geometry: &ErrorGeometry) -> TrackingErrors {
    let (width, height) = (f64::from(image_size.0), f64::from(image_size.1));
    if width <= 0.0 || height <= 0.0 {
        return TrackingErrors::default();
    }

    let bbox = &target.bbox;
    let box_height = f64::from(bbox.height);

    let x = (2.0 * bbox.center_x() - width) / height;

    // Measured up from the bottom edge.
    let mut object_y = height - f64::from(bbox.y);
    if target.label == "person" && object_y < height - geometry.bottom_margin_px {
        object_y -= geometry.person_anchor_fraction * box_height;
    } else {
        object_y -= 0.5 * box_height;
    }
    let y = 2.0 * object_y / height - 1.0;

    let size = bbox.area() as f64 / (width * height);
    let z = if size > 0.0 {
        geometry.target_area.powf(-0.5) - size.powf(-0.5)
    } else {
        0.0
    };

    TrackingErrors { x, y, z }
}
