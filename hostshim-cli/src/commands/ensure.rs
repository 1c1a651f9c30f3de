pub async fn execute(global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let shim = global.connect().await?;
    let child = shim.child();
    let origin = if child.adopted { "reused" } else { "created" };
    println!("{}\t{}\t{}", child.id, child.name, origin);
    Ok(())
}
