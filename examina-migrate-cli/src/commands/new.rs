//! Commands that only touch change files

use super::GlobalOptions;
use anyhow::Result;
use examina_migrate::ChangeLoader;

/// Write a change file template
pub fn create(options: &GlobalOptions, name: &str) -> Result<()> {
    let config = options.load_config()?;
    let loader = ChangeLoader::new(&config.migrations_dir);
    let file_path = loader.create_change(name)?;

    println!("📝 Created change file: {}", file_path.display());
    println!("   Change name: {}", name);
    Ok(())
}

/// Validate every change file in the migrations directory
pub fn validate(options: &GlobalOptions) -> Result<()> {
    let config = options.load_config()?;
    let loader = ChangeLoader::new(&config.migrations_dir);

    println!(
        "🔍 Validating changes in {}...",
        config.migrations_dir.display()
    );
    let result = loader.validate_changes()?;

    println!(
        "\n📊 {} of {} change file(s) valid",
        result.valid_count, result.total_count
    );

    if result.has_warnings() {
        println!("\n⚠️  Warnings ({}):", result.warnings.len());
        for warning in &result.warnings {
            println!("   {}", warning);
        }
    }

    if !result.is_valid() {
        println!("\n❌ Errors ({}):", result.errors.len());
        for error in &result.errors {
            println!("   {}", error);
        }
        anyhow::bail!("{} invalid change file(s)", result.errors.len());
    }

    println!("🎉 All change files are valid");
    Ok(())
}
