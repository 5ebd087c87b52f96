// checkpoint defaults
pub const DEFAULT_Z_DIM: i64 = 256;
pub const DEFAULT_NGF: i64 = 64;
pub const DEFAULT_CROP_SIZE: i64 = 256;

// hyper-parameters: SPADE modulation
pub const SPADE_HIDDEN_CHANNELS: i64 = 128; // hidden width of the shared segmap MLP
pub const PARAM_FREE_NORM_EPS: f64 = 1e-5;

// hyper-parameters: generator trunk
pub const HEAD_WIDTH_MULT: i64 = 16; // head channels = 16 * ngf
pub const LEAKY_RELU_SLOPE: f64 = 0.2;
