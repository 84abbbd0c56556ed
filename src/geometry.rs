//! Pixel -> mirror-step geometry.
//!
//! Pinhole projection with 3rd-order radial/tangential lens distortion,
//! translation into the mirror coordinate frame, and the two-mirror angle
//! solve, all taken directly from the original device's calibration math.
//! Everything here is pure arithmetic over [`GeometryConfig`]; nothing
//! touches the mailbox or the motors.

use crate::config::{FRAME_HEIGHT, FRAME_WIDTH, GeometryConfig};

/// A fully resolved location: pixel, camera-plane, mirror-frame and step
/// coordinates for one point, mirroring the original's `struct loc`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Loc {
    pub px: i32,
    pub py: i32,
    pub xd: f64,
    pub yd: f64,
    pub x: f64,
    pub y: f64,
    pub xm: f64,
    pub ym: f64,
    pub m1_theta: f64,
    pub m2_theta: f64,
    pub m1_steps: f64,
    pub m2_steps: f64,
}

impl Loc {
    pub const ZERO: Loc = Loc {
        px: 0,
        py: 0,
        xd: 0.0,
        yd: 0.0,
        x: 0.0,
        y: 0.0,
        xm: 0.0,
        ym: 0.0,
        m1_theta: 0.0,
        m2_theta: 0.0,
        m1_steps: 0.0,
        m2_steps: 0.0,
    };
}

/// A move's trapezoidal time profile: ramp up, optional cruise, ramp down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveProfile {
    pub ramp_time: f64,
    pub ramp_dist: f64,
}

impl MoveProfile {
    fn from_config(cfg: &GeometryConfig) -> Self {
        let ramp_time = cfg.max_v / cfg.accel;
        let ramp_dist = cfg.accel * ramp_time * ramp_time / 2.0;
        MoveProfile {
            ramp_time,
            ramp_dist,
        }
    }
}

/// Stateless coordinate/angle converter over a fixed [`GeometryConfig`].
pub struct Geometry {
    cfg: GeometryConfig,
    profile: MoveProfile,
}

impl Geometry {
    pub fn new(cfg: GeometryConfig) -> Self {
        let profile = MoveProfile::from_config(&cfg);
        Geometry { cfg, profile }
    }

    pub fn config(&self) -> &GeometryConfig {
        &self.cfg
    }

    fn px_to_xd(&self, px: f64) -> f64 {
        (px - FRAME_WIDTH as f64 / 2.0) * self.cfg.in_per_pix * self.cfg.camera_height_in
            / self.cfg.lens_focal_len_in
    }

    fn py_to_yd(&self, py: f64) -> f64 {
        -(py - FRAME_HEIGHT as f64 / 2.0) * self.cfg.in_per_pix * self.cfg.camera_height_in
            / self.cfg.lens_focal_len_in
    }

    fn xdyd_to_x(&self, xd: f64, yd: f64) -> f64 {
        let r2 = xd * xd + yd * yd;
        let x_radial_corr = xd * (self.cfg.k1 * r2 + self.cfg.k2 * r2 * r2 + self.cfg.k3 * r2 * r2 * r2);
        let x_tan_corr =
            (self.cfg.p1 * (r2 + 2.0 * xd * xd) + 2.0 * self.cfg.p2 * xd * yd) * (1.0 + self.cfg.p3 * r2);
        xd + x_radial_corr + x_tan_corr
    }

    fn xdyd_to_y(&self, xd: f64, yd: f64) -> f64 {
        let r2 = xd * xd + yd * yd;
        let y_radial_corr = yd * (self.cfg.k1 * r2 + self.cfg.k2 * r2 * r2 + self.cfg.k3 * r2 * r2 * r2);
        let y_tan_corr =
            (2.0 * self.cfg.p1 * xd * yd + self.cfg.p2 * (r2 + 2.0 * yd * yd)) * (1.0 + self.cfg.p3 * r2);
        yd + y_radial_corr + y_tan_corr
    }

    fn calc_m2_theta(&self, x: f64) -> f64 {
        -(self.cfg.m1x - x).atan2(self.cfg.m2zb) / 2.0
    }

    fn calc_m1_theta(&self, y: f64, m2_theta: f64) -> f64 {
        let denom = self.cfg.m2za - self.cfg.m1z + self.cfg.m2z / (2.0 * m2_theta).cos();
        -(self.cfg.m1y - y).atan2(denom) / 2.0
    }

    fn theta_to_steps(&self, theta: f64) -> f64 {
        theta * self.cfg.steps_per_rev * self.cfg.microsteps_per_step * self.cfg.gear_ratio
            / (2.0 * std::f64::consts::PI)
    }

    /// Converts undistorted camera-plane coordinates into a fully resolved
    /// mirror-frame [`Loc`] (no pixel/distorted fields set).
    pub fn xy_to_loc(&self, x: f64, y: f64) -> Loc {
        let xm = self.cfg.camera_to_mirrors_x - x;
        let ym = self.cfg.camera_to_mirrors_y - y;
        let m2_theta = self.calc_m2_theta(xm);
        let m1_theta = self.calc_m1_theta(ym, m2_theta);
        Loc {
            px: 0,
            py: 0,
            xd: 0.0,
            yd: 0.0,
            x,
            y,
            xm,
            ym,
            m1_theta,
            m2_theta,
            m1_steps: -self.theta_to_steps(m1_theta),
            m2_steps: -self.theta_to_steps(m2_theta),
        }
    }

    fn pxy_to_xy(&self, px: i32, py: i32) -> (f64, f64) {
        let xd = self.px_to_xd(px as f64);
        let yd = self.py_to_yd(py as f64);
        (self.xdyd_to_x(xd, yd), self.xdyd_to_y(xd, yd))
    }

    /// Converts a pixel location into a fully resolved [`Loc`].
    pub fn pxy_to_loc(&self, px: i32, py: i32) -> Loc {
        let xd = self.px_to_xd(px as f64);
        let yd = self.py_to_yd(py as f64);
        let x = self.xdyd_to_x(xd, yd);
        let y = self.xdyd_to_y(xd, yd);
        let mut loc = self.xy_to_loc(x, y);
        loc.px = px;
        loc.py = py;
        loc.xd = xd;
        loc.yd = yd;
        loc
    }

    /// Local millimetres-per-pixel scale at a point, used to size patches
    /// and keep-out margins in physical units.
    pub fn mm_per_pixel(&self, px: i32, py: i32) -> f64 {
        let px1 = if px >= FRAME_WIDTH - 10 { px - 10 } else { px + 10 };
        let (x1, y1) = self.pxy_to_xy(px, py);
        let (x2, y2) = self.pxy_to_xy(px1, py);
        let dx = x1 - x2;
        let dy = y1 - y2;
        let dist_in = (dx * dx + dy * dy).sqrt() / 10.0;
        dist_in * 25.4
    }

    /// Trapezoidal move time in seconds between two resolved locations,
    /// measured in step-space distance.
    pub fn move_time(&self, cur: &Loc, target: &Loc) -> f64 {
        let m1_delta = target.m1_steps - cur.m1_steps;
        let m2_delta = target.m2_steps - cur.m2_steps;
        let dist = (m1_delta * m1_delta + m2_delta * m2_delta).sqrt();
        if dist > self.profile.ramp_dist * 2.0 {
            self.profile.ramp_time * 2.0 + (dist - self.profile.ramp_dist * 2.0) / self.cfg.max_v
        } else {
            2.0 * (dist / self.cfg.accel).sqrt()
        }
    }

    /// True if a (possibly scaled) pixel coordinate falls outside the frame.
    pub fn keepout(&self, px: i32, py: i32, scale: i32) -> bool {
        let (px, py) = match scale {
            2 => (px + px, py + py),
            1 => (px, py),
            s => (px * s, py * s),
        };
        py < 0 || py > FRAME_HEIGHT - 1 || px < 0 || px > FRAME_WIDTH - 1
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_center_projects_near_origin() {
        let geo = Geometry::new(GeometryConfig::default());
        let loc = geo.pxy_to_loc(FRAME_WIDTH / 2, FRAME_HEIGHT / 2);
        assert!(loc.xd.abs() < 1e-9);
        assert!(loc.yd.abs() < 1e-9);
    }

    #[test]
    fn keepout_flags_outside_frame() {
        let geo = Geometry::new(GeometryConfig::default());
        assert!(geo.keepout(-1, 10, 1));
        assert!(geo.keepout(10, FRAME_HEIGHT, 1));
        assert!(!geo.keepout(10, 10, 1));
    }

    #[test]
    fn keepout_scale_two_doubles_coords() {
        let geo = Geometry::new(GeometryConfig::default());
        // 700*2 = 1400 > 1279, out of frame only once scaled.
        assert!(!geo.keepout(700, 10, 1));
        assert!(geo.keepout(700, 10, 2));
    }

    #[test]
    fn move_time_is_zero_for_no_delta() {
        let geo = Geometry::new(GeometryConfig::default());
        let loc = geo.pxy_to_loc(640, 480);
        assert_eq!(geo.move_time(&loc, &loc), 0.0);
    }

    #[test]
    fn move_time_grows_with_distance() {
        let geo = Geometry::new(GeometryConfig::default());
        let near = geo.pxy_to_loc(640, 480);
        let far = geo.pxy_to_loc(0, 0);
        assert!(geo.move_time(&near, &far) > 0.0);
    }
}
