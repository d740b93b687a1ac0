use anyhow::Result;
use clap::Parser;
use log::info;
use prettytable::{cell, row, Table};
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};
use tch::{kind::FLOAT_CPU, nn, Tensor};
use yolo_v1::{Config, Yolo};

#[derive(Debug, Clone, Parser)]
/// Inspect and exercise the YOLO network.
enum Opts {
    /// Print the layers of the network.
    Info {
        /// configuration file
        #[clap(long)]
        config_file: Option<PathBuf>,
    },
    /// Run the network on a random image and print the output shapes.
    SelfTest {
        /// configuration file
        #[clap(long)]
        config_file: Option<PathBuf>,
        /// number of images in the batch
        #[clap(long, default_value = "1")]
        batch_size: NonZeroUsize,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::Info { config_file } => {
            info(config_file.as_deref())?;
        }
        Opts::SelfTest {
            config_file,
            batch_size,
        } => {
            self_test(config_file.as_deref(), batch_size)?;
        }
    }

    Ok(())
}

fn load_config(config_file: Option<&Path>) -> Result<Config> {
    let config = match config_file {
        Some(path) => Config::open(path)?,
        None => {
            info!("no config file is given, use default configuration");
            Config::default()
        }
    };
    Ok(config)
}

fn build_model(config: &Config) -> Result<(nn::VarStore, Yolo)> {
    let vs = nn::VarStore::new(config.model.device);
    let model = config.model.yolo_init().build(vs.root())?;
    Ok((vs, model))
}

fn info(config_file: Option<&Path>) -> Result<()> {
    let config = load_config(config_file)?;
    let (_vs, model) = build_model(&config)?;
    let network = model.network();

    // print layer information
    {
        let mut table = Table::new();
        table.add_row(row!["name", "kind", "output shape", "parameters"]);
        table.add_row(row![
            "input",
            "",
            format!("{:?}", network.input_shape()),
            ""
        ]);

        network.summary().iter().for_each(|layer| {
            table.add_row(row![
                layer.name,
                layer.kind,
                format!("{:?}", layer.output_shape),
                layer.num_parameters,
            ]);
        });

        table.printstd();
    }

    println!("total parameters: {}", network.num_parameters());

    Ok(())
}

fn self_test(config_file: Option<&Path>, batch_size: NonZeroUsize) -> Result<()> {
    let config = load_config(config_file)?;
    let (vs, model) = build_model(&config)?;
    println!("{}", model);

    let image_size = model.geometry().image_size() as i64;
    let image = (Tensor::rand(
        &[batch_size.get() as i64, 3, image_size, image_size],
        FLOAT_CPU,
    ) - 0.5)
        .to_device(vs.device());
    println!("Input image: {:?}", image.size());

    let output = tch::no_grad(|| model.forward(&image))?;
    println!(
        "Network output: {:?} {:?}",
        output.output.size(),
        output.pred_box.size()
    );

    Ok(())
}
