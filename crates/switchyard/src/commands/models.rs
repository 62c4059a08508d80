use crate::config::Config;
use anyhow::Result;
use switchyard_runtime::Provider;

/// Print the model catalog, one provider per block in routing order.
pub fn execute(config: &Config) -> Result<()> {
    let catalog = config.catalog()?;
    for provider in Provider::ALL {
        println!("{}:", provider);
        for model in catalog.models(provider) {
            println!("  {}", model);
        }
    }
    Ok(())
}
