//! Projection contract consumed by tile enumeration and viewport sampling.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// Screen projection of the map view.
///
/// `scale` is the projection scale `k` (world width in pixels is `k·2π`),
/// `translate` the pixel offset of the (0°, 0°) point, and `clip_extent` the
/// viewport rectangle `[[x0, y0], [x1, y1]]` in pixels. `invert` maps a pixel
/// back to `[lon, lat]` in degrees.
///
/// Implementations must be cheap: callers invoke `invert` per tile and per cell.
pub trait Projection {
    fn scale(&self) -> f64;
    fn translate(&self) -> [f64; 2];
    fn invert(&self, point: [f64; 2]) -> [f64; 2];
    fn clip_extent(&self) -> [[f64; 2]; 2];

    /// Effective (fractional) zoom level implied by `scale`.
    fn zoom(&self) -> f64 {
        effective_zoom(self.scale())
    }
}

/// `max(log2(scale·2π) − 8, 0)`; 256px tiles at zoom 0.
pub fn effective_zoom(scale: f64) -> f64 {
    ((scale * 2.0 * PI).log2() - 8.0).max(0.0)
}

/// Spherical Mercator with a y-down pixel space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Mercator {
    scale: f64,
    translate: [f64; 2],
    clip_extent: [[f64; 2]; 2],
}

impl Mercator {
    pub fn new(scale: f64, translate: [f64; 2], clip_extent: [[f64; 2]; 2]) -> Self {
        Self {
            scale,
            translate,
            clip_extent,
        }
    }

    /// A view of `size` pixels centered on `center` (`[lon, lat]`) at `zoom`.
    pub fn centered(center: [f64; 2], zoom: f64, size: [f64; 2]) -> Self {
        let scale = 256.0 * 2f64.powf(zoom) / (2.0 * PI);
        let lambda = center[0].to_radians();
        let phi = center[1].to_radians();
        let translate = [
            size[0] / 2.0 - scale * lambda,
            size[1] / 2.0 + scale * (FRAC_PI_4 + phi / 2.0).tan().ln(),
        ];
        Self::new(scale, translate, [[0.0, 0.0], size])
    }

    pub fn project(&self, lonlat: [f64; 2]) -> [f64; 2] {
        let lambda = lonlat[0].to_radians();
        let phi = lonlat[1].to_radians();
        [
            self.translate[0] + self.scale * lambda,
            self.translate[1] - self.scale * (FRAC_PI_4 + phi / 2.0).tan().ln(),
        ]
    }
}

impl Projection for Mercator {
    fn scale(&self) -> f64 {
        self.scale
    }

    fn translate(&self) -> [f64; 2] {
        self.translate
    }

    fn invert(&self, point: [f64; 2]) -> [f64; 2] {
        let lambda = (point[0] - self.translate[0]) / self.scale;
        let phi = 2.0 * ((self.translate[1] - point[1]) / self.scale).exp().atan() - FRAC_PI_2;
        [lambda.to_degrees(), phi.to_degrees()]
    }

    fn clip_extent(&self) -> [[f64; 2]; 2] {
        self.clip_extent
    }
}
