use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use passt_binding_lib::api::info::{info_client::InfoClient, InfoParams};
use passt_binding_lib::api::v1alpha2::{
    callbacks_client::CallbacksClient, OnDefineDomainParams, PreCloudInitIsoParams,
};
use passt_binding_lib::hooks::{grpc, DEFAULT_HOOK_VERSION};

#[derive(Clone, Debug, ValueEnum)]
enum CommandKind {
    Info,
    DefineDomain,
    PreCloudInitIso,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long)]
    command: CommandKind,
    #[arg(long, default_value = "/var/run/kubevirt-hooks/passt.sock")]
    socket: PathBuf,
    /// Domain XML file sent with define-domain
    #[arg(long)]
    domain_xml: Option<PathBuf>,
    /// VMI JSON file sent with define-domain and pre-cloud-init-iso
    #[arg(long)]
    vmi: Option<PathBuf>,
    /// Cloud-init data file sent with pre-cloud-init-iso
    #[arg(long)]
    cloud_init: Option<PathBuf>,
}

fn read_file(path: Option<&PathBuf>, flag: &str) -> anyhow::Result<Vec<u8>> {
    let path = path.ok_or_else(|| anyhow::anyhow!("--{flag} is required for this command"))?;
    Ok(std::fs::read(path)?)
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    eprintln!(
        "Connecting to {} and executing {:?}",
        args.socket.display(),
        args.command
    );
    let channel = grpc::connect(&args.socket).await?;

    match args.command {
        CommandKind::Info => {
            let request = tonic::Request::new(InfoParams {
                supported_hook_sidecar_versions: vec![DEFAULT_HOOK_VERSION.to_string()],
            });
            let response = InfoClient::new(channel).info(request).await?;
            println!("{:#?}", response.into_inner());
        }
        CommandKind::DefineDomain => {
            let request = tonic::Request::new(OnDefineDomainParams {
                domain_xml: read_file(args.domain_xml.as_ref(), "domain-xml")?,
                vmi: read_file(args.vmi.as_ref(), "vmi")?,
            });
            let response = CallbacksClient::new(channel)
                .on_define_domain(request)
                .await?;
            std::io::stdout().write_all(&response.into_inner().domain_xml)?;
        }
        CommandKind::PreCloudInitIso => {
            let request = tonic::Request::new(PreCloudInitIsoParams {
                cloud_init_data: read_file(args.cloud_init.as_ref(), "cloud-init")?,
                vmi: args
                    .vmi
                    .as_ref()
                    .map(std::fs::read)
                    .transpose()?
                    .unwrap_or_default(),
            });
            let response = CallbacksClient::new(channel)
                .pre_cloud_init_iso(request)
                .await?;
            std::io::stdout().write_all(&response.into_inner().cloud_init_data)?;
        }
    };

    Ok(())
}
