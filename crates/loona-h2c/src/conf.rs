use std::time::Duration;

/// Host server settings
#[derive(Debug, Clone)]
pub struct ServerConf {
    /// Hand connections that open with the HTTP/2 preface straight to the
    /// HTTP/2 engine
    pub allow_prior_knowledge: bool,

    /// Honor `Upgrade: h2c` requests
    pub allow_upgrade: bool,

    /// How long to wait for the first bytes of a connection before deciding
    /// it isn't a prior-knowledge HTTP/2 client
    pub sniff_timeout: Duration,

    /// Settings for the HTTP/2 engine
    pub h2: H2Conf,
}

impl Default for ServerConf {
    fn default() -> Self {
        Self {
            allow_prior_knowledge: true,
            allow_upgrade: true,
            sniff_timeout: Duration::from_secs(10),
            h2: Default::default(),
        }
    }
}

/// HTTP/2 engine settings. `None` means "whatever the engine defaults to".
#[derive(Debug, Clone, Default)]
pub struct H2Conf {
    pub max_concurrent_streams: Option<u32>,
    pub initial_stream_window_size: Option<u32>,
    pub initial_connection_window_size: Option<u32>,

    /// Largest frame the engine accepts
    pub max_frame_size: Option<u32>,

    pub max_header_list_size: Option<u32>,
}
