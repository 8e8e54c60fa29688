use clap::Args;

use super::CliContext;
use service_adaptor::schema::write_schema;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Output directory. Default: `<root>/schemas`
    #[arg(long)]
    pub out_dir: Option<std::path::PathBuf>,
}

pub async fn execute(args: SchemaArgs, context: &CliContext) -> anyhow::Result<()> {
    let out_dir = args.out_dir.unwrap_or_else(|| context.root.join("schemas"));
    let files = write_schema(&out_dir)?;
    println!("{} schemas written to {}", files.len(), out_dir.display());
    Ok(())
}
