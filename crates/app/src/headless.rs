use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process;

use geoflow_core::{
    geometry_in, EngineSettings, GpuBackend, GraphEngine, NodeId, NodeParams, ParamValue, Project,
    ProjectConnection, ProjectNode, GEOMETRY_OUT,
};
use geoflow_render::{CameraState, WgpuBackend};
use serde::Deserialize;
use tracing::Level;

use crate::logging;

const DEFAULT_FRAMES: u32 = 60;
const DEFAULT_DT: f32 = 1.0 / 60.0;

#[derive(Debug, Deserialize)]
struct HeadlessPlan {
    #[serde(default)]
    settings: EngineSettings,
    #[serde(default)]
    nodes: Vec<PlanNode>,
    #[serde(default)]
    links: Vec<PlanLink>,
}

#[derive(Debug, Deserialize)]
struct PlanNode {
    name: String,
    kind: String,
    #[serde(default)]
    params: BTreeMap<String, ParamValue>,
    #[serde(default = "default_true")]
    output_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct PlanLink {
    from: PlanEndpoint,
    to: PlanEndpoint,
}

#[derive(Debug, Deserialize)]
struct PlanEndpoint {
    node: String,
    #[serde(default)]
    pin: Option<String>,
}

#[derive(Debug)]
pub(crate) struct HeadlessArgs {
    plan_path: Option<PathBuf>,
    project_path: Option<PathBuf>,
    save_path: Option<PathBuf>,
    print: bool,
    frames: u32,
    dt: f32,
    gpu: bool,
    pub(crate) log_level: Level,
}

pub(crate) fn parse_headless_args(args: &[String]) -> Result<HeadlessArgs, String> {
    let mut parsed = HeadlessArgs {
        plan_path: None,
        project_path: None,
        save_path: None,
        print: false,
        frames: DEFAULT_FRAMES,
        dt: DEFAULT_DT,
        gpu: false,
        log_level: Level::INFO,
    };
    // First entry is the binary path.
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--plan" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--plan requires a path".to_string())?;
                parsed.plan_path = Some(PathBuf::from(value));
            }
            "--project" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--project requires a path".to_string())?;
                parsed.project_path = Some(PathBuf::from(value));
            }
            "--save" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--save requires a path".to_string())?;
                parsed.save_path = Some(PathBuf::from(value));
            }
            "--print" => {
                parsed.print = true;
            }
            "--frames" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--frames requires a count".to_string())?;
                parsed.frames = value
                    .parse()
                    .map_err(|_| format!("invalid frame count {value}"))?;
            }
            "--dt" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--dt requires seconds".to_string())?;
                let dt: f32 = value
                    .parse()
                    .map_err(|_| format!("invalid frame time {value}"))?;
                if !dt.is_finite() || dt < 0.0 {
                    return Err(format!("invalid frame time {value}"));
                }
                parsed.dt = dt;
            }
            "--gpu" => {
                parsed.gpu = true;
            }
            "--log-level" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--log-level requires a level".to_string())?;
                parsed.log_level = logging::parse_level(value)
                    .ok_or_else(|| format!("unknown log level {value}"))?;
            }
            "--help" | "-h" => {
                print_headless_help();
                process::exit(0);
            }
            other => return Err(format!("unknown argument {other}")),
        }
    }

    if parsed.plan_path.is_some() && parsed.project_path.is_some() {
        return Err("--plan and --project are exclusive".to_string());
    }
    Ok(parsed)
}

fn print_headless_help() {
    println!(
        "Options:\n  --plan <path>\n  --project <path>\n  --save <path>\n  --print\n  --frames <count>\n  --dt <seconds>\n  --gpu\n  --log-level <error|warn|info|debug|trace>"
    );
}

pub(crate) fn run_headless(args: &HeadlessArgs) -> Result<(), String> {
    let project = if let Some(path) = &args.project_path {
        load_project(path)?
    } else {
        let plan = match &args.plan_path {
            Some(path) => load_headless_plan(path)?,
            None => default_headless_plan(),
        };
        build_project_from_plan(&plan)?
    };

    if args.gpu {
        let backend = WgpuBackend::request().map_err(|err| err.to_string())?;
        tracing::info!(adapter = backend.adapter_name(), "headless: gpu backend ready");
        let engine = GraphEngine::new(backend, project.settings.clone());
        run_engine(engine, &project, args)
    } else {
        run_engine(GraphEngine::headless(), &project, args)
    }
}

fn run_engine<B: GpuBackend>(
    mut engine: GraphEngine<B>,
    project: &Project,
    args: &HeadlessArgs,
) -> Result<(), String> {
    project
        .load_into(&mut engine)
        .map_err(|err| err.to_string())?;

    for frame in 0..args.frames {
        let changed = engine.tick(args.dt);
        tracing::trace!(frame, changed = changed.len(), "headless: frame stepped");
    }
    print!("{}", scene_summary(&engine));

    if args.save_path.is_some() || args.print {
        let json = Project::capture(&engine)
            .to_json()
            .map_err(|err| err.to_string())?;
        if let Some(path) = &args.save_path {
            std::fs::write(path, &json).map_err(|err| err.to_string())?;
            tracing::info!("headless: saved project to {:?}", path);
        }
        if args.print {
            println!("{json}");
        }
    }

    engine.release_all();
    tracing::info!(frames = args.frames, "headless: completed");
    Ok(())
}

fn load_project(path: &Path) -> Result<Project, String> {
    let data = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    Project::from_json(&data).map_err(|err| err.to_string())
}

fn load_headless_plan(path: &Path) -> Result<HeadlessPlan, String> {
    let data = std::fs::read(path).map_err(|err| err.to_string())?;
    serde_json::from_slice(&data).map_err(|err| err.to_string())
}

/// Falling boxes copied onto a raised grid next to a displaced, shaded torus.
fn default_headless_plan() -> HeadlessPlan {
    let node = |name: &str, kind: &str, params: Vec<(&str, ParamValue)>| PlanNode {
        name: name.to_string(),
        kind: kind.to_string(),
        params: params
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
        output_enabled: true,
    };
    let link = |from: &str, to: &str, input: usize| PlanLink {
        from: PlanEndpoint {
            node: from.to_string(),
            pin: None,
        },
        to: PlanEndpoint {
            node: to.to_string(),
            pin: Some(geometry_in(input)),
        },
    };

    HeadlessPlan {
        settings: EngineSettings::default(),
        nodes: vec![
            node("box", "Cube", vec![("size", ParamValue::Vec3([0.3; 3]))]),
            node(
                "grid",
                "Plane",
                vec![
                    ("divisions", ParamValue::Int(2)),
                    ("center", ParamValue::Vec3([0.0, 3.0, 0.0])),
                ],
            ),
            node("scatter", "Copy to Points", Vec::new()),
            node("bodies", "Rigidbody", Vec::new()),
            node(
                "ring",
                "Torus",
                vec![("major_radius", ParamValue::Float(1.5))],
            ),
            node("wobble", "Noise", Vec::new()),
            node(
                "paint",
                "Material",
                vec![
                    ("name", ParamValue::String("copper".to_string())),
                    ("base_color", ParamValue::Vec3([0.85, 0.45, 0.25])),
                    ("metallic", ParamValue::Float(1.0)),
                ],
            ),
        ],
        links: vec![
            link("box", "scatter", 0),
            link("grid", "scatter", 1),
            link("scatter", "bodies", 0),
            link("ring", "wobble", 0),
            link("wobble", "paint", 0),
        ],
    }
}

/// Lowers a plan into a saved project with ids in plan order, so it can be
/// replayed like any file written with `--save`.
fn build_project_from_plan(plan: &HeadlessPlan) -> Result<Project, String> {
    let mut project = Project {
        settings: plan.settings.clone(),
        ..Default::default()
    };
    let mut name_to_id = HashMap::new();

    for (index, node) in plan.nodes.iter().enumerate() {
        let id = index as u64 + 1;
        if name_to_id.insert(node.name.clone(), id).is_some() {
            return Err(format!("duplicate node name {}", node.name));
        }
        project.nodes.push(ProjectNode {
            id,
            kind: node.kind.clone(),
            label: node.name.clone(),
            params: NodeParams {
                values: node.params.clone(),
            },
            output_enabled: node.output_enabled,
            position: None,
        });
    }

    for link in &plan.links {
        let source = name_to_id
            .get(&link.from.node)
            .ok_or_else(|| format!("unknown node {}", link.from.node))?;
        let target = name_to_id
            .get(&link.to.node)
            .ok_or_else(|| format!("unknown node {}", link.to.node))?;
        project.connections.push(ProjectConnection {
            source: *source,
            source_output: link
                .from
                .pin
                .clone()
                .unwrap_or_else(|| GEOMETRY_OUT.to_string()),
            target: *target,
            target_input: link.to.pin.clone().unwrap_or_else(|| geometry_in(0)),
        });
    }

    Ok(project)
}

fn scene_summary<B: GpuBackend>(engine: &GraphEngine<B>) -> String {
    let scene = engine.scene();
    let mut out = String::new();
    let visible: Vec<String> = engine
        .store()
        .visible()
        .iter()
        .map(|id| id.to_string())
        .collect();
    let _ = writeln!(out, "visible: [{}]", visible.join(", "));

    for draw in &scene.draws {
        let label = engine
            .node(NodeId::from_raw(draw.node))
            .map(|node| node.label())
            .unwrap_or("?");
        let material = scene
            .material_for(draw)
            .map(|material| material.name.as_str())
            .unwrap_or("default");
        let _ = writeln!(
            out,
            "  {} '{}': {} vertices, {} triangles, material {}",
            NodeId::from_raw(draw.node),
            label,
            draw.vertex_count,
            draw.index_count / 3,
            material
        );
    }
    let _ = writeln!(
        out,
        "scene: {} draws, {} vertices, {} triangles, {} wire segments, {} rebuilds",
        scene.draws.len(),
        scene.vertex_count(),
        scene.triangle_count(),
        scene.wireframe_indices.len() / 2,
        engine.rebuild_count()
    );
    if let Some(bounds) = scene.bounds {
        let camera = CameraState::framing(&bounds);
        let _ = writeln!(
            out,
            "bounds: min {:.3?} max {:.3?}; camera distance {:.3}",
            bounds.min.to_array(),
            bounds.max.to_array(),
            camera.distance
        );
    }
    out
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("geoflow")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parses_frame_and_output_options() {
        let parsed = parse_headless_args(&args(&[
            "--frames",
            "5",
            "--dt",
            "0.02",
            "--print",
            "--log-level",
            "debug",
        ]))
        .expect("args");
        assert_eq!(parsed.frames, 5);
        assert_eq!(parsed.dt, 0.02);
        assert!(parsed.print);
        assert!(!parsed.gpu);
        assert_eq!(parsed.log_level, Level::DEBUG);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_headless_args(&args(&["--frames"])).is_err());
        assert!(parse_headless_args(&args(&["--dt", "-1"])).is_err());
        assert!(parse_headless_args(&args(&["--wat"])).is_err());
        assert!(parse_headless_args(&args(&["--plan", "a", "--project", "b"])).is_err());
    }

    #[test]
    fn plan_links_resolve_by_name() {
        let plan: HeadlessPlan = serde_json::from_str(
            r#"{
                "nodes": [
                    { "name": "a", "kind": "Cube" },
                    { "name": "b", "kind": "Transform",
                      "params": { "translate": { "Vec3": [0.0, 2.0, 0.0] } } }
                ],
                "links": [{ "from": { "node": "a" }, "to": { "node": "b" } }]
            }"#,
        )
        .expect("plan");
        let project = build_project_from_plan(&plan).expect("project");
        assert_eq!(project.nodes.len(), 2);
        assert_eq!(project.connections[0].source, 1);
        assert_eq!(project.connections[0].target_input, geometry_in(0));

        let mut engine = GraphEngine::headless();
        project.load_into(&mut engine).expect("load");
        let bounds = engine.scene().bounds.expect("bounds");
        assert!(bounds.min.y > 1.0);
    }

    #[test]
    fn unknown_link_names_are_reported() {
        let plan = HeadlessPlan {
            settings: EngineSettings::default(),
            nodes: Vec::new(),
            links: vec![PlanLink {
                from: PlanEndpoint {
                    node: "ghost".to_string(),
                    pin: None,
                },
                to: PlanEndpoint {
                    node: "other".to_string(),
                    pin: None,
                },
            }],
        };
        let err = build_project_from_plan(&plan).expect_err("unknown");
        assert!(err.contains("ghost"));
    }

    #[test]
    fn default_plan_settles_into_two_draws() {
        let project = build_project_from_plan(&default_headless_plan()).expect("project");
        let mut engine = GraphEngine::headless();
        project.load_into(&mut engine).expect("load");
        for _ in 0..3 {
            engine.tick(DEFAULT_DT);
        }

        assert_eq!(engine.store().visible().len(), 2);
        assert_eq!(engine.scene().draws.len(), 2);
        let summary = scene_summary(&engine);
        assert!(summary.contains("'bodies'"));
        assert!(summary.contains("material copper"));
    }
}
