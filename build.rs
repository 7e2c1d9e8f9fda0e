use vergen_gitcl::{Emitter, GitclBuilder};

// Feeds `mdlcache --version`: branch, short sha and commit date.
fn main() -> anyhow::Result<()> {
    let git = GitclBuilder::default()
        .branch(true)
        .sha(true)
        .commit_date(true)
        .build()?;

    Emitter::default().add_instructions(&git)?.emit()?;
    Ok(())
}
