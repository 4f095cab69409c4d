use std::collections::BTreeMap;

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::geometry::{Geometry, PointAttributes};
use crate::graph::{NodeDefinition, NodeParams, ParamValue};
use crate::node::{Combiner, NodeError};
use crate::nodes::combiner_definition;
use crate::param_spec::ParamSpec;

pub const NAME: &str = "Copy to Points";

pub const INPUTS: usize = 2;

pub fn definition() -> NodeDefinition {
    combiner_definition(NAME, INPUTS)
}

pub fn default_params() -> NodeParams {
    NodeParams {
        values: BTreeMap::from([
            ("align_to_normals".to_string(), ParamValue::Bool(true)),
            ("translate".to_string(), ParamValue::Vec3([0.0, 0.0, 0.0])),
            ("rotate_deg".to_string(), ParamValue::Vec3([0.0, 0.0, 0.0])),
            ("scale".to_string(), ParamValue::Vec3([1.0, 1.0, 1.0])),
        ]),
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::bool("align_to_normals", "Align to Normals")
            .with_help("Rotate each copy so its +Y follows the template point normal."),
        ParamSpec::vec3("translate", "Translate"),
        ParamSpec::vec3("rotate_deg", "Rotate"),
        ParamSpec::vec3("scale", "Scale"),
    ]
}

/// Copies `geometry0` onto every point of `geometry1`, recording one
/// instance per point.
#[derive(Debug, Default)]
pub struct CopyToPointsNode;

impl Combiner for CopyToPointsNode {
    fn input_count(&self) -> usize {
        INPUTS
    }

    fn apply_modification_multiple(
        &mut self,
        params: &NodeParams,
        inputs: &[&Geometry],
    ) -> Result<Geometry, NodeError> {
        let source = inputs
            .first()
            .ok_or(NodeError::MissingInput { slot: 0 })?;
        let template = inputs.get(1).ok_or(NodeError::MissingInput { slot: 1 })?;
        if template.positions.is_empty() {
            return Ok(Geometry::default());
        }

        let align_to_normals = params.get_bool("align_to_normals", true);
        let translate = Vec3::from(params.get_vec3("translate", [0.0, 0.0, 0.0]));
        let rotate_deg = Vec3::from(params.get_vec3("rotate_deg", [0.0, 0.0, 0.0]));
        let scale = Vec3::from(params.get_vec3("scale", [1.0, 1.0, 1.0]));

        let rot = rotate_deg * std::f32::consts::PI / 180.0;
        let user_quat = Quat::from_euler(EulerRot::XYZ, rot.x, rot.y, rot.z);

        let mut normals = template.normals.clone();
        if align_to_normals && normals.is_none() {
            let mut temp = (*template).clone();
            temp.compute_normals();
            normals = temp.normals;
        }

        let mut points = PointAttributes {
            instance_vertex_count: source.positions.len() as u32,
            ..Default::default()
        };
        let mut copies = Vec::with_capacity(template.positions.len());
        for (idx, pos) in template.positions.iter().enumerate() {
            let mut rotation = user_quat;
            if align_to_normals {
                let normal = normals
                    .as_ref()
                    .and_then(|normals| normals.get(idx).copied())
                    .map(Vec3::from)
                    .unwrap_or(Vec3::Y);
                if normal.length_squared() > 0.0001 {
                    rotation = Quat::from_rotation_arc(Vec3::Y, normal.normalize()) * user_quat;
                }
            }
            let position = Vec3::from(*pos) + translate;
            let mut copy = (*source).clone();
            copy.points = None;
            copy.transform(Mat4::from_scale_rotation_translation(scale, rotation, position));
            copies.push(copy);

            points.positions.push(position.to_array());
            points.scales.push(scale.to_array());
            points.orientations.push(rotation.to_array());
        }

        let copy_refs: Vec<&Geometry> = copies.iter().collect();
        let mut geometry = Geometry::merge(&copy_refs);
        geometry.points = Some(points);
        Ok(geometry)
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        param_specs()
    }
}
