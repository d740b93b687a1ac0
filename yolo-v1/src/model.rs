use crate::{
    common::*,
    layer::{LayerInit, LayerKind},
    network::Network,
    transform::{GridGeometry, BOX_ENTRIES},
};

pub use yolo_init::*;
pub use yolo_model::*;
pub use yolo_output::*;

/// The number of input image channels.
pub const INPUT_CHANNELS: usize = 3;

/// (in, out) channels of the convolutions followed by max pooling.
const POOLED_CONV_CHANNELS: [(usize, usize); 6] = [
    (3, 16),
    (16, 32),
    (32, 64),
    (64, 128),
    (128, 256),
    (256, 512),
];

/// (in, out) channels of the convolutions working on the final grid.
const GRID_CONV_CHANNELS: [(usize, usize); 3] = [(512, 1024), (1024, 1024), (1024, 1024)];

const HIDDEN_DIM: usize = 256;

mod yolo_init {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct YoloInit {
        pub num_boxes: usize,
        pub num_classes: usize,
    }

    impl YoloInit {
        pub fn num_channels(&self) -> usize {
            self.num_boxes * BOX_ENTRIES + self.num_classes
        }

        /// Lists the layers of the network in execution order.
        pub fn layers(&self, geometry: &GridGeometry) -> Vec<LayerInit> {
            let grid_size = geometry.grid_size();
            let (_, last_channels) = GRID_CONV_CHANNELS[GRID_CONV_CHANNELS.len() - 1];

            let pooled = POOLED_CONV_CHANNELS
                .iter()
                .enumerate()
                .flat_map(|(index, &(in_c, out_c))| {
                    let nth = index + 1;
                    [
                        LayerInit::new(format!("conv{}", nth), LayerKind::conv_3x3(in_c, out_c)),
                        LayerInit::new(format!("relu{}", nth), LayerKind::Relu),
                        LayerInit::new(format!("max_pool{}", nth), LayerKind::max_pool_2x2()),
                    ]
                });

            let unpooled = GRID_CONV_CHANNELS
                .iter()
                .enumerate()
                .flat_map(|(index, &(in_c, out_c))| {
                    let nth = POOLED_CONV_CHANNELS.len() + index + 1;
                    [
                        LayerInit::new(format!("conv{}", nth), LayerKind::conv_3x3(in_c, out_c)),
                        LayerInit::new(format!("relu{}", nth), LayerKind::Relu),
                    ]
                });

            let head = [
                LayerInit::new("flatten", LayerKind::Flatten),
                LayerInit::new(
                    "fc1",
                    LayerKind::Linear {
                        in_dim: last_channels * grid_size * grid_size,
                        out_dim: HIDDEN_DIM,
                    },
                ),
                LayerInit::new("relu_fc1", LayerKind::Relu),
                LayerInit::new(
                    "fc2",
                    LayerKind::Linear {
                        in_dim: HIDDEN_DIM,
                        out_dim: HIDDEN_DIM,
                    },
                ),
                LayerInit::new("relu_fc2", LayerKind::Relu),
                LayerInit::new(
                    "output",
                    LayerKind::Linear {
                        in_dim: HIDDEN_DIM,
                        out_dim: self.num_channels() * grid_size * grid_size,
                    },
                ),
            ];

            pooled.chain(unpooled).chain(head).collect()
        }

        pub fn build<'p, P>(self, path: P) -> Result<Yolo>
        where
            P: Borrow<nn::Path<'p>>,
        {
            let path = path.borrow();
            let Self {
                num_boxes,
                num_classes,
            } = self;

            ensure!(num_boxes > 0, "num_boxes must be positive");
            ensure!(num_classes > 0, "num_classes must be positive");

            let geometry = GridGeometry::default();
            let image_size = geometry.image_size();
            let network = Network::new(
                path / "network",
                &[INPUT_CHANNELS, image_size, image_size],
                self.layers(&geometry),
            )?;

            let grid_size = geometry.grid_size();
            ensure!(
                network.output_shape() == &[self.num_channels() * grid_size * grid_size],
                "unexpected network output shape {:?}",
                network.output_shape()
            );

            info!(
                "built YOLO network with {} boxes, {} classes and {} parameters",
                num_boxes,
                num_classes,
                network.num_parameters()
            );

            Ok(Yolo {
                num_boxes,
                num_classes,
                geometry,
                network,
            })
        }
    }
}

mod yolo_model {
    use super::*;

    #[derive(Debug, Getters, CopyGetters)]
    pub struct Yolo {
        #[getset(get_copy = "pub")]
        pub(super) num_boxes: usize,
        #[getset(get_copy = "pub")]
        pub(super) num_classes: usize,
        #[getset(get_copy = "pub")]
        pub(super) geometry: GridGeometry,
        #[getset(get = "pub")]
        pub(super) network: Network,
    }

    impl Yolo {
        /// The number of output channels per cell.
        pub fn num_channels(&self) -> usize {
            YoloInit {
                num_boxes: self.num_boxes,
                num_classes: self.num_classes,
            }
            .num_channels()
        }

        /// Runs the network on a `[batch, 3, 448, 448]` image tensor.
        pub fn forward(&self, xs: &Tensor) -> Result<YoloOutput> {
            let image_size = self.geometry.image_size() as i64;
            let grid_size = self.geometry.grid_size() as i64;

            let (batch_size, channels, height, width) = xs.size4()?;
            ensure!(
                channels == INPUT_CHANNELS as i64 && height == image_size && width == image_size,
                "expect input shape [_, {}, {}, {}], but get {:?}",
                INPUT_CHANNELS,
                image_size,
                image_size,
                xs.size()
            );
            ensure!(batch_size > 0, "the input batch is empty");
            ensure!(
                xs.kind() == Kind::Float,
                "expect a {:?} input, but get {:?}",
                Kind::Float,
                xs.kind()
            );
            debug!("run forward pass on a batch of {} images", batch_size);

            let output = self.network.forward(xs).f_reshape(&[
                batch_size,
                self.num_channels() as i64,
                grid_size,
                grid_size,
            ])?;
            let pred_box = self.transform_predictions(&output)?;

            Ok(YoloOutput { output, pred_box })
        }

        /// Converts a raw output into image-space boxes.
        pub fn transform_predictions(&self, output: &Tensor) -> Result<Tensor> {
            let (_, channels, _, _) = output.size4()?;
            ensure!(
                channels == self.num_channels() as i64,
                "expect {} output channels, but get {}",
                self.num_channels(),
                channels
            );
            self.geometry
                .transform_predictions(output, self.num_boxes)
        }
    }

    impl Display for Yolo {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            writeln!(
                f,
                "YOLO(num_boxes={}, num_classes={})",
                self.num_boxes, self.num_classes
            )?;
            write!(f, "{}", self.network)
        }
    }
}

mod yolo_output {
    use super::*;

    /// The raw network output and the boxes in image space, both in shape
    /// `[batch, 5 * num_boxes + num_classes, 7, 7]`.
    #[derive(Debug, TensorLike)]
    pub struct YoloOutput {
        pub output: Tensor,
        pub pred_box: Tensor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_list_test() {
        let init = YoloInit {
            num_boxes: 2,
            num_classes: 1,
        };
        let layers = init.layers(&GridGeometry::default());
        let names: Vec<_> = layers.iter().map(|layer| layer.name.as_str()).collect();

        assert_eq!(layers.len(), 6 * 3 + 3 * 2 + 6);
        assert_eq!(&names[..4], ["conv1", "relu1", "max_pool1", "conv2"]);
        assert_eq!(
            &names[names.len() - 6..],
            ["flatten", "fc1", "relu_fc1", "fc2", "relu_fc2", "output"]
        );
        assert_eq!(
            layers[layers.len() - 1].kind,
            LayerKind::Linear {
                in_dim: 256,
                out_dim: 11 * 49
            }
        );
    }

    #[test]
    fn layer_shapes_test() -> Result<()> {
        let init = YoloInit {
            num_boxes: 2,
            num_classes: 1,
        };
        let mut shape = vec![3, 448, 448];
        for layer in init.layers(&GridGeometry::default()) {
            shape = layer.kind.output_shape(&shape)?;
            if layer.name == "max_pool6" || layer.name == "relu9" {
                assert_eq!(shape[1..], [7, 7]);
            }
        }
        assert_eq!(shape, [11 * 49]);
        Ok(())
    }

    #[test]
    fn zero_counts_are_rejected() {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        assert!(YoloInit {
            num_boxes: 0,
            num_classes: 1
        }
        .build(&root)
        .is_err());
        assert!(YoloInit {
            num_boxes: 1,
            num_classes: 0
        }
        .build(&root)
        .is_err());
    }
}
