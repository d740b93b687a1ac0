pub use anyhow::{bail, ensure, Context as _, Result};
pub use getset::{CopyGetters, Getters};
pub use itertools::Itertools as _;
pub use log::{debug, info};
pub use once_cell::sync::Lazy;
pub use semver::{Version, VersionReq};
pub use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
pub use std::{
    borrow::Borrow,
    fmt::{self, Display, Formatter},
    fs,
    path::Path,
};
pub use strum::AsRefStr;
pub use tch::{
    nn::{self, Module as _},
    Device, IndexOp, Kind, Tensor,
};
pub use tch_tensor_like::TensorLike;
