//! Per-frame detection coordination, broadcast streams and bounds
//! smoothing for live camera analysis.

pub mod animation {
    pub mod bounds_interpolator;
    pub mod scheduler;
    pub mod infrastructure {
        pub mod manual_scheduler;
        pub mod thread_scheduler;
    }
}

pub mod detection {
    pub mod domain {
        pub mod detection;
        pub mod detector;
    }
    pub mod infrastructure;
}

pub mod graphic {
    pub mod bounds_scaler;
    pub mod overlay;
}

pub mod pipeline {
    pub mod detection_coordinator;
    pub mod join_latch;
    pub mod infrastructure {
        pub mod worker_pool;
    }
}

pub mod settings;

pub mod shared {
    pub mod constants;
    pub mod frame;
    pub mod geometry;
}

pub mod stream;

pub mod video {
    pub mod domain {
        pub mod frame_source;
    }
    pub mod infrastructure {
        pub mod image_directory_source;
        pub mod synthetic_source;
    }
}
