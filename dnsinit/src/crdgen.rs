use dnsinit::Route;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Route::crd())?);
    Ok(())
}
