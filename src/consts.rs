use crate::config::{self, AreaScope, Config};
use std::num::NonZeroUsize;

pub const DEFAULT_CONFIG: Config = Config {
    rpn: config::Rpn {
        num_points: unsafe { NonZeroUsize::new_unchecked(16384) },
        use_intensity: false,
        fixed: false,
    },
    pc_reduce_by_range: true,
    pc_area_scope: AreaScope([[-40.0, 40.0], [-1.0, 3.0], [0.0, 70.4]]),
    near_depth_m: 40.0,
    gt_extra_width: 0.2,
};
