use crate::common::*;

pub use layer_::*;
pub use layer_init::*;
pub use layer_kind::*;

mod layer_kind {
    use super::*;

    /// The operation and shape parameters of a layer.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, AsRefStr)]
    pub enum LayerKind {
        Conv2D {
            in_c: usize,
            out_c: usize,
            ksize: usize,
            stride: usize,
            padding: usize,
        },
        Relu,
        MaxPool2D {
            ksize: usize,
            stride: usize,
        },
        Flatten,
        Linear {
            in_dim: usize,
            out_dim: usize,
        },
    }

    impl LayerKind {
        /// A 3x3 convolution with stride 1 that preserves the spatial size.
        pub fn conv_3x3(in_c: usize, out_c: usize) -> Self {
            Self::Conv2D {
                in_c,
                out_c,
                ksize: 3,
                stride: 1,
                padding: 1,
            }
        }

        /// A 2x2 max pooling with stride 2 that halves the spatial size.
        pub fn max_pool_2x2() -> Self {
            Self::MaxPool2D {
                ksize: 2,
                stride: 2,
            }
        }

        /// Checks that sizes, strides and dimensions are non-zero.
        pub fn check(&self) -> Result<()> {
            match *self {
                Self::Conv2D {
                    in_c,
                    out_c,
                    ksize,
                    stride,
                    ..
                } => ensure!(
                    in_c > 0 && out_c > 0 && ksize > 0 && stride > 0,
                    "invalid Conv2D parameters {}",
                    self
                ),
                Self::MaxPool2D { ksize, stride } => ensure!(
                    ksize > 0 && stride > 0,
                    "invalid MaxPool2D parameters {}",
                    self
                ),
                Self::Linear { in_dim, out_dim } => ensure!(
                    in_dim > 0 && out_dim > 0,
                    "invalid Linear parameters {}",
                    self
                ),
                Self::Relu | Self::Flatten => {}
            }
            Ok(())
        }

        /// Computes the output shape from the input shape. Both shapes exclude
        /// the batch dimension.
        pub fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
            self.check()?;

            let output_shape = match *self {
                Self::Conv2D {
                    in_c,
                    out_c,
                    ksize,
                    stride,
                    padding,
                } => {
                    let (c, h, w) = match *input_shape {
                        [c, h, w] => (c, h, w),
                        _ => bail!(
                            "Conv2D expects a [c, h, w] input, but get {:?}",
                            input_shape
                        ),
                    };
                    ensure!(
                        c == in_c,
                        "Conv2D expects {} input channels, but get {}",
                        in_c,
                        c
                    );
                    ensure!(
                        h + 2 * padding >= ksize && w + 2 * padding >= ksize,
                        "input size {}x{} is smaller than kernel size {}",
                        h,
                        w,
                        ksize
                    );
                    let out_h = (h + 2 * padding - ksize) / stride + 1;
                    let out_w = (w + 2 * padding - ksize) / stride + 1;
                    vec![out_c, out_h, out_w]
                }
                Self::MaxPool2D { ksize, stride } => {
                    let (c, h, w) = match *input_shape {
                        [c, h, w] => (c, h, w),
                        _ => bail!(
                            "MaxPool2D expects a [c, h, w] input, but get {:?}",
                            input_shape
                        ),
                    };
                    ensure!(
                        h >= ksize && w >= ksize,
                        "input size {}x{} is smaller than kernel size {}",
                        h,
                        w,
                        ksize
                    );
                    vec![c, (h - ksize) / stride + 1, (w - ksize) / stride + 1]
                }
                Self::Flatten => vec![input_shape.iter().product()],
                Self::Linear { in_dim, out_dim } => {
                    ensure!(
                        input_shape == [in_dim],
                        "Linear expects a [{}] input, but get {:?}",
                        in_dim,
                        input_shape
                    );
                    vec![out_dim]
                }
                Self::Relu => input_shape.to_vec(),
            };

            Ok(output_shape)
        }

        /// The number of learned parameters, including biases.
        pub fn num_parameters(&self) -> usize {
            match *self {
                Self::Conv2D {
                    in_c, out_c, ksize, ..
                } => out_c * in_c * ksize * ksize + out_c,
                Self::Linear { in_dim, out_dim } => out_dim * in_dim + out_dim,
                Self::Relu | Self::MaxPool2D { .. } | Self::Flatten => 0,
            }
        }
    }

    impl Display for LayerKind {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match *self {
                Self::Conv2D {
                    in_c,
                    out_c,
                    ksize,
                    stride,
                    padding,
                } => write!(
                    f,
                    "Conv2D({}, {}, kernel_size={}, stride={}, padding={})",
                    in_c, out_c, ksize, stride, padding
                ),
                Self::MaxPool2D { ksize, stride } => {
                    write!(f, "MaxPool2D(kernel_size={}, stride={})", ksize, stride)
                }
                Self::Linear { in_dim, out_dim } => {
                    write!(f, "Linear({}, {})", in_dim, out_dim)
                }
                Self::Relu | Self::Flatten => write!(f, "{}", self.as_ref()),
            }
        }
    }
}

mod layer_init {
    use super::*;

    /// A named layer description that is not bound to any variable store yet.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct LayerInit {
        pub name: String,
        pub kind: LayerKind,
    }

    impl LayerInit {
        pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
            Self {
                name: name.into(),
                kind,
            }
        }

        pub fn build<'p, P>(self, path: P) -> Result<Layer>
        where
            P: Borrow<nn::Path<'p>>,
        {
            let path = path.borrow();
            let Self { name, kind } = self;
            kind.check()
                .with_context(|| format!("invalid layer '{}'", name))?;
            let sub = path / name.as_str();

            let module = match kind {
                LayerKind::Conv2D {
                    in_c,
                    out_c,
                    ksize,
                    stride,
                    padding,
                } => {
                    // He initialization w.r.t. fan-out
                    let fan_out = ksize * ksize * out_c;
                    let stdev = (2.0 / fan_out as f64).sqrt();

                    let conv = nn::conv2d(
                        &sub,
                        in_c as i64,
                        out_c as i64,
                        ksize as i64,
                        nn::ConvConfig {
                            stride: stride as i64,
                            padding: padding as i64,
                            ws_init: nn::Init::Randn { mean: 0.0, stdev },
                            bs_init: nn::Init::Const(0.0),
                            ..Default::default()
                        },
                    );
                    LayerModule::Conv2D(conv)
                }
                LayerKind::Linear { in_dim, out_dim } => {
                    let linear = nn::linear(&sub, in_dim as i64, out_dim as i64, Default::default());
                    LayerModule::Linear(linear)
                }
                LayerKind::MaxPool2D { ksize, stride } => LayerModule::MaxPool2D {
                    ksize: ksize as i64,
                    stride: stride as i64,
                },
                LayerKind::Relu => LayerModule::Relu,
                LayerKind::Flatten => LayerModule::Flatten,
            };

            Ok(Layer { name, kind, module })
        }
    }
}

mod layer_ {
    use super::*;

    #[derive(Debug)]
    pub(crate) enum LayerModule {
        Conv2D(nn::Conv2D),
        Relu,
        MaxPool2D { ksize: i64, stride: i64 },
        Flatten,
        Linear(nn::Linear),
    }

    /// A layer bound to its parameters.
    #[derive(Debug, Getters)]
    pub struct Layer {
        #[getset(get = "pub")]
        pub(crate) name: String,
        #[getset(get = "pub")]
        pub(crate) kind: LayerKind,
        pub(crate) module: LayerModule,
    }

    impl nn::Module for Layer {
        fn forward(&self, xs: &Tensor) -> Tensor {
            match self.module {
                LayerModule::Conv2D(ref conv) => conv.forward(xs),
                LayerModule::Linear(ref linear) => linear.forward(xs),
                LayerModule::Relu => xs.relu(),
                LayerModule::MaxPool2D { ksize, stride } => xs.max_pool2d(
                    &[ksize, ksize],
                    &[stride, stride],
                    &[0, 0],
                    &[1, 1], // dilation
                    false,   // ceil_mode
                ),
                LayerModule::Flatten => xs.flatten(1, -1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_3x3_keeps_spatial_size() -> Result<()> {
        let shape = LayerKind::conv_3x3(3, 16).output_shape(&[3, 448, 448])?;
        assert_eq!(shape, [16, 448, 448]);
        Ok(())
    }

    #[test]
    fn max_pool_halves_spatial_size() -> Result<()> {
        let shape = LayerKind::max_pool_2x2().output_shape(&[512, 14, 14])?;
        assert_eq!(shape, [512, 7, 7]);
        Ok(())
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        assert!(LayerKind::conv_3x3(3, 16).output_shape(&[4, 8, 8]).is_err());
        assert!(LayerKind::Linear {
            in_dim: 10,
            out_dim: 2
        }
        .output_shape(&[11])
        .is_err());
        assert!(LayerKind::Flatten.output_shape(&[2, 3, 4]).is_ok());
    }

    #[test]
    fn zero_stride_is_rejected() -> Result<()> {
        let conv = LayerKind::Conv2D {
            in_c: 3,
            out_c: 4,
            ksize: 3,
            stride: 0,
            padding: 1,
        };
        ensure!(conv.output_shape(&[3, 8, 8]).is_err(), "zero stride conv accepted");

        let pool = LayerKind::MaxPool2D {
            ksize: 2,
            stride: 0,
        };
        ensure!(pool.output_shape(&[3, 8, 8]).is_err(), "zero stride pool accepted");

        let vs = nn::VarStore::new(Device::Cpu);
        ensure!(
            LayerInit::new("conv", conv).build(vs.root()).is_err(),
            "zero stride conv built"
        );
        Ok(())
    }

    #[test]
    fn layer_forward_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let conv = LayerInit::new("conv", LayerKind::conv_3x3(3, 4)).build(&root)?;
        let pool = LayerInit::new("pool", LayerKind::max_pool_2x2()).build(&root)?;
        let flatten = LayerInit::new("flatten", LayerKind::Flatten).build(&root)?;

        let input = Tensor::randn(&[2, 3, 8, 8], tch::kind::FLOAT_CPU);
        let output = conv.forward(&input);
        assert_eq!(output.size(), [2, 4, 8, 8]);
        let output = pool.forward(&output);
        assert_eq!(output.size(), [2, 4, 4, 4]);
        let output = flatten.forward(&output);
        assert_eq!(output.size(), [2, 64]);
        Ok(())
    }

    #[test]
    fn parameter_count_test() {
        assert_eq!(LayerKind::conv_3x3(3, 16).num_parameters(), 16 * 3 * 9 + 16);
        assert_eq!(
            LayerKind::Linear {
                in_dim: 256,
                out_dim: 10
            }
            .num_parameters(),
            2570
        );
        assert_eq!(LayerKind::Relu.num_parameters(), 0);
    }
}
