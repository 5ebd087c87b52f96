pub use anyhow::{bail, ensure, format_err, Context, Error, Result as Fallible};
pub use argh::FromArgs;
pub use derivative::Derivative;
pub use image::{
    imageops::FilterType, io::Reader as ImageReader, DynamicImage, GenericImageView, ImageBuffer,
    ImageFormat, Luma, Rgb, RgbImage,
};
pub use itertools::Itertools;
pub use log::{debug, error, info, warn};
pub use ndarray::{s, Array2, Array3, ArrayView2, Axis};
pub use regex::Regex;
pub use serde::{
    de::Error as DeserializeError, ser::Error as SerializeError, Deserialize, Deserializer,
    Serialize, Serializer,
};
pub use std::{
    borrow::Borrow,
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt::{self, Display},
    fs::{self, File},
    io::{prelude::*, BufWriter},
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
pub use tch::{
    nn::{self, Conv2D, ConvConfig, Init, Module, VarStore},
    Device, Kind, TchError, Tensor,
};
