use crate::{
    common::*,
    layer::{Layer, LayerInit, LayerKind},
};

/// One row of the network summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSummary {
    pub name: String,
    pub kind: LayerKind,
    /// The output shape without the batch dimension.
    pub output_shape: Vec<usize>,
    pub num_parameters: usize,
}

/// An ordered chain of layers whose shapes are checked at construction.
#[derive(Debug, Getters)]
pub struct Network {
    #[getset(get = "pub")]
    input_shape: Vec<usize>,
    #[getset(get = "pub")]
    output_shape: Vec<usize>,
    #[getset(get = "pub")]
    summary: Vec<LayerSummary>,
    layers: Vec<Layer>,
}

impl Network {
    pub fn new<'p, P, I>(path: P, input_shape: &[usize], layers: I) -> Result<Self>
    where
        P: Borrow<nn::Path<'p>>,
        I: IntoIterator<Item = LayerInit>,
    {
        let path = path.borrow();
        let mut shape = input_shape.to_vec();
        let mut summary = vec![];

        let layers: Vec<Layer> = layers
            .into_iter()
            .map(|init| -> Result<_> {
                let output_shape = init
                    .kind
                    .output_shape(&shape)
                    .with_context(|| format!("invalid layer '{}'", init.name))?;

                summary.push(LayerSummary {
                    name: init.name.clone(),
                    kind: init.kind.clone(),
                    output_shape: output_shape.clone(),
                    num_parameters: init.kind.num_parameters(),
                });
                shape = output_shape;

                init.build(path)
            })
            .try_collect()?;

        ensure!(!layers.is_empty(), "the network must have at least one layer");

        Ok(Self {
            input_shape: input_shape.to_vec(),
            output_shape: shape,
            summary,
            layers,
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn num_parameters(&self) -> usize {
        self.summary.iter().map(|row| row.num_parameters).sum()
    }
}

impl nn::Module for Network {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.layers
            .iter()
            .fold(xs.shallow_clone(), |xs, layer| layer.forward(&xs))
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Network(")?;
        for row in &self.summary {
            writeln!(f, "  ({}): {}", row.name, row.kind)?;
        }
        write!(f, ")")
    }
}
