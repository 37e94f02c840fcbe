// Runs against a cluster where the dnsinit controller is already deployed
use std::time::Duration;

use dnsinit::{
    initializer::{INITIALIZER_NAME, OUTPUT_ANNOTATION, OUTPUT_VALUE, REQUIRED_ANNOTATION},
    Route,
};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    runtime::wait::{await_condition, conditions},
    Client, CustomResourceExt, ResourceExt,
};
use tracing::info;

fn initialized(route: Option<&Route>) -> bool {
    route.is_some_and(|r| r.spec.initializers.is_none())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let client = Client::try_default().await?;

    info!("Installing Route CRD");
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd_name = Route::crd_name();
    crds.patch(
        crd_name,
        &PatchParams::apply("dnsinit-e2e").force(),
        &Patch::Apply(Route::crd()),
    )
    .await?;
    let established = await_condition(crds, crd_name, conditions::is_crd_established());
    tokio::time::timeout(Duration::from_secs(10), established).await??;

    let routes: Api<Route> = Api::default_namespaced(client);
    let cases = [("annotated-route", true), ("plain-route", false)];
    for (name, annotated) in cases {
        let mut annotations = serde_json::Map::new();
        if annotated {
            annotations.insert(REQUIRED_ANNOTATION.into(), "enabled".into());
        }
        let data = serde_json::from_value(serde_json::json!({
            "apiVersion": "sample.io/v1",
            "kind": "Route",
            "metadata": {
                "name": name,
                "annotations": annotations,
            },
            "spec": {
                "initializers": { "pending": [{ "name": INITIALIZER_NAME }] },
                "rules": [{ "host": format!("{name}.e2e.example.com") }]
            }
        }))?;
        info!("Creating route {name}");
        routes.create(&PostParams::default(), &data).await?;
    }

    for (name, annotated) in cases {
        info!("Waiting for route {name} to be initialized");
        let cond = await_condition(routes.clone(), name, initialized);
        let route = tokio::time::timeout(Duration::from_secs(60), cond)
            .await??
            .ok_or_else(|| anyhow::anyhow!("route {name} disappeared"))?;
        let output = route.annotations().get(OUTPUT_ANNOTATION);
        if annotated {
            anyhow::ensure!(
                output.map(String::as_str) == Some(OUTPUT_VALUE),
                "route {name} missing output annotation"
            );
        } else {
            anyhow::ensure!(output.is_none(), "route {name} should not be annotated");
        }
    }

    info!("Cleaning up routes");
    for (name, _) in cases {
        routes.delete(name, &DeleteParams::default()).await?;
    }
    Ok(())
}
