//! Format-independent print settings.
//!
//! Each container spreads these over different records (and the PHZ header
//! stores some of them twice). These types are what the containers agree on,
//! and are how settings move between formats.

/// Properties of the printer a file was sliced for.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Machine {
    /// LCD mask size in pixels, `[x, y]`.
    pub resolution: [u32; 2],
    /// Build volume in millimeters, `[x, y, z]`.
    pub bed_size_mm: [f32; 3],
    /// Machine name as recorded by the slicer. Not necessarily UTF-8.
    pub machine_name: Vec<u8>,
    /// 0 for a plain LCD, 1 for a mirrored one.
    pub projector_type: u32,
}

/// Settings that apply to the whole print.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Job {
    pub layer_height_mm: f32,
    pub overall_height_mm: f32,
    pub bottom_layer_count: u32,
    /// Slicer's estimate, in seconds.
    pub print_time_s: u32,
    pub retract_speed_mmpm: f32,
    pub print_volume_ml: f32,
    pub print_mass_g: f32,
    /// In whatever currency the slicer was set to.
    pub print_price: f32,

    /// Settings for layers at or above `bottom_layer_count`.
    pub normal: LayerConfig,
    /// Settings for the first `bottom_layer_count` layers.
    pub bottom: LayerConfig,
}

impl Job {
    /// Picks the settings that apply to layer `index`.
    pub fn config_for(&self, index: u32) -> &LayerConfig {
        if index < self.bottom_layer_count {
            &self.bottom
        } else {
            &self.normal
        }
    }

    /// Z position of layer `index` in millimeters.
    pub fn z_for(&self, index: u32) -> f32 {
        index as f32 * self.layer_height_mm
    }
}

/// Per-layer exposure and motion settings.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct LayerConfig {
    pub exposure_s: f32,
    pub light_off_time_s: f32,
    pub lift_dist_mm: f32,
    pub lift_speed_mmpm: f32,
    /// Backlight PWM, 0-255.
    pub pwm_level: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottom_layers_use_bottom_config() {
        let job = Job {
            layer_height_mm: 0.05,
            bottom_layer_count: 2,
            normal: LayerConfig {
                exposure_s: 8.,
                ..LayerConfig::default()
            },
            bottom: LayerConfig {
                exposure_s: 60.,
                ..LayerConfig::default()
            },
            ..Job::default()
        };
        assert_eq!(job.config_for(0).exposure_s, 60.);
        assert_eq!(job.config_for(1).exposure_s, 60.);
        assert_eq!(job.config_for(2).exposure_s, 8.);
        assert_eq!(job.z_for(3), 3. * 0.05);
    }
}
