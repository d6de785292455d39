//! Scene document loading and flattening
//!
//! A `SceneDocument` is the parsed form of a glTF-style scene: a node forest
//! where each node carries a local transform, optional mesh primitives, and
//! child indices. `load_scene` flattens all geometry into one global
//! vertex/index buffer pair and an arena of nodes addressed by stable index.
//! Child lists are index arrays and the parent is an optional index, so the
//! arena needs no pointer graph.

use crate::assets::{AssetError, AssetResult};
use crate::foundation::math::{Mat4, Quaternion, Unit, Vec3};
use crate::render::mesh::Vertex;

/// Stable index of a node in the loaded arena
pub type NodeIndex = usize;

/// Index payload of one primitive, in the width the source file used
#[derive(Debug, Clone)]
pub enum IndexData {
    /// 8-bit indices
    U8(Vec<u8>),
    /// 16-bit indices
    U16(Vec<u16>),
    /// 32-bit indices
    U32(Vec<u32>),
}

impl IndexData {
    fn len(&self) -> usize {
        match self {
            IndexData::U8(v) => v.len(),
            IndexData::U16(v) => v.len(),
            IndexData::U32(v) => v.len(),
        }
    }
}

/// One draw primitive of a mesh
#[derive(Debug, Clone)]
pub struct PrimitiveDesc {
    /// Vertex positions
    pub positions: Vec<[f32; 3]>,
    /// Vertex normals; empty, or one per position
    pub normals: Vec<[f32; 3]>,
    /// Texture coordinates; empty, or one per position
    pub tex_coords: Vec<[f32; 2]>,
    /// Indices into `positions`
    pub indices: IndexData,
    /// Material index into the document's material list
    pub material: Option<usize>,
}

/// A mesh is a list of primitives sharing one node transform
#[derive(Debug, Clone, Default)]
pub struct MeshDesc {
    /// Draw primitives
    pub primitives: Vec<PrimitiveDesc>,
}

/// Material parameters referenced by primitives
#[derive(Debug, Clone)]
pub struct MaterialDesc {
    /// RGBA base color factor
    pub base_color: [f32; 4],
    /// Texture index into the shared texture array, if textured
    pub base_color_texture: Option<usize>,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            base_color: [1.0, 1.0, 1.0, 1.0],
            base_color_texture: None,
        }
    }
}

/// One node of the scene document
///
/// The transform is either decomposed (any subset of translation, rotation,
/// scale, composed in T·R·S order) or a raw matrix. The two forms are
/// mutually exclusive in well-formed input; if both are present the raw
/// matrix silently wins because it is applied last.
#[derive(Debug, Clone, Default)]
pub struct NodeDesc {
    /// Node name for diagnostics
    pub name: String,
    /// Translation component
    pub translation: Option<[f32; 3]>,
    /// Rotation quaternion as `[x, y, z, w]`
    pub rotation: Option<[f32; 4]>,
    /// Per-axis scale component
    pub scale: Option<[f32; 3]>,
    /// Raw column-major transform, overriding the decomposed fields
    pub matrix: Option<[[f32; 4]; 4]>,
    /// Mesh index into the document's mesh list
    pub mesh: Option<usize>,
    /// Child node indices into the document's node list
    pub children: Vec<usize>,
}

impl NodeDesc {
    /// Resolve the node's local transform matrix
    pub fn local_matrix(&self) -> Mat4 {
        if let Some(matrix) = self.matrix {
            return Mat4::from(matrix);
        }

        let translation = self
            .translation
            .map(|t| Mat4::new_translation(&Vec3::new(t[0], t[1], t[2])))
            .unwrap_or_else(Mat4::identity);
        let rotation = self
            .rotation
            .map(|[x, y, z, w]| {
                Unit::new_normalize(Quaternion::new(w, x, y, z)).to_homogeneous()
            })
            .unwrap_or_else(Mat4::identity);
        let scale = self
            .scale
            .map(|s| Mat4::new_nonuniform_scaling(&Vec3::new(s[0], s[1], s[2])))
            .unwrap_or_else(Mat4::identity);

        translation * rotation * scale
    }
}

/// Parsed scene: a node forest plus shared mesh and material lists
#[derive(Debug, Clone, Default)]
pub struct SceneDocument {
    /// All nodes; root and child alike
    pub nodes: Vec<NodeDesc>,
    /// Indices of the forest's root nodes
    pub roots: Vec<usize>,
    /// Shared mesh list
    pub meshes: Vec<MeshDesc>,
    /// Shared material list
    pub materials: Vec<MaterialDesc>,
}

/// One index range of the global index buffer, drawn with a node's transform
#[derive(Debug, Clone, Copy)]
pub struct DrawRange {
    /// First index in the global index buffer
    pub first_index: u32,
    /// Number of indices
    pub index_count: u32,
    /// Material index, if the source primitive had one
    pub material: Option<usize>,
}

/// Arena node of a loaded scene
#[derive(Debug, Clone)]
pub struct Node {
    /// Node name carried over from the document
    pub name: String,
    /// Parent node, `None` for roots
    pub parent: Option<NodeIndex>,
    /// Child nodes
    pub children: Vec<NodeIndex>,
    /// Local (parent-relative) transform
    pub local_transform: Mat4,
    /// Draw ranges contributed by this node's mesh
    pub primitives: Vec<DrawRange>,
}

/// Loaded material, resolved from the document
#[derive(Debug, Clone)]
pub struct Material {
    /// RGBA base color factor
    pub base_color: [f32; 4],
    /// Texture index into the shared texture array
    pub base_color_texture: Option<usize>,
}

/// Flattened scene ready for GPU upload
///
/// All geometry shares one vertex and one index buffer; indices are already
/// biased by each primitive's vertex start, so draws need no vertex offset.
#[derive(Debug, Clone, Default)]
pub struct LoadedScene {
    /// Global vertex buffer contents
    pub vertices: Vec<Vertex>,
    /// Global index buffer contents
    pub indices: Vec<u32>,
    /// Node arena; indices match the source document's node indices
    pub nodes: Vec<Node>,
    /// Resolved materials
    pub materials: Vec<Material>,
}

impl LoadedScene {
    /// World transform of a node, computed by walking the parent chain
    ///
    /// O(depth) per call and not cached; scene depth is shallow.
    pub fn world_matrix(&self, node: NodeIndex) -> Mat4 {
        let mut matrix = self.nodes[node].local_transform;
        let mut current = self.nodes[node].parent;
        while let Some(parent) = current {
            matrix = self.nodes[parent].local_transform * matrix;
            current = self.nodes[parent].parent;
        }
        matrix
    }
}

/// Flatten a scene document into a single vertex/index buffer pair plus a
/// node arena
///
/// Children are visited before the parent's own primitives are appended;
/// each primitive captures the buffer sizes immediately before appending, so
/// traversal order determines buffer layout but not correctness.
pub fn load_scene(document: &SceneDocument) -> AssetResult<LoadedScene> {
    let mut scene = LoadedScene {
        vertices: Vec::new(),
        indices: Vec::new(),
        nodes: document
            .nodes
            .iter()
            .map(|desc| Node {
                name: desc.name.clone(),
                parent: None,
                children: desc.children.clone(),
                local_transform: desc.local_matrix(),
                primitives: Vec::new(),
            })
            .collect(),
        materials: document
            .materials
            .iter()
            .map(|m| Material {
                base_color: m.base_color,
                base_color_texture: m.base_color_texture,
            })
            .collect(),
    };

    let mut visited = vec![false; document.nodes.len()];
    for &root in &document.roots {
        if root >= document.nodes.len() {
            return Err(AssetError::Malformed(format!(
                "root index {} out of range ({} nodes)",
                root,
                document.nodes.len()
            )));
        }
        visit_node(document, root, None, &mut scene, &mut visited)?;
    }

    Ok(scene)
}

fn visit_node(
    document: &SceneDocument,
    index: usize,
    parent: Option<usize>,
    scene: &mut LoadedScene,
    visited: &mut [bool],
) -> AssetResult<()> {
    if visited[index] {
        return Err(AssetError::Malformed(format!(
            "node {} appears in more than one place in the forest",
            index
        )));
    }
    visited[index] = true;
    scene.nodes[index].parent = parent;

    let desc = &document.nodes[index];
    for &child in &desc.children {
        if child >= document.nodes.len() {
            return Err(AssetError::Malformed(format!(
                "node {} references child {} but only {} nodes exist",
                index,
                child,
                document.nodes.len()
            )));
        }
        visit_node(document, child, Some(index), scene, visited)?;
    }

    if let Some(mesh_index) = desc.mesh {
        let mesh = document.meshes.get(mesh_index).ok_or_else(|| {
            AssetError::Malformed(format!(
                "node {} references mesh {} but only {} meshes exist",
                index,
                mesh_index,
                document.meshes.len()
            ))
        })?;

        for primitive in &mesh.primitives {
            let range = append_primitive(primitive, scene)?;
            scene.nodes[index].primitives.push(range);
        }
    }

    Ok(())
}

fn append_primitive(primitive: &PrimitiveDesc, scene: &mut LoadedScene) -> AssetResult<DrawRange> {
    let count = primitive.positions.len();
    if !primitive.normals.is_empty() && primitive.normals.len() != count {
        return Err(AssetError::Malformed(format!(
            "primitive has {} normals for {} positions",
            primitive.normals.len(),
            count
        )));
    }
    if !primitive.tex_coords.is_empty() && primitive.tex_coords.len() != count {
        return Err(AssetError::Malformed(format!(
            "primitive has {} texture coordinates for {} positions",
            primitive.tex_coords.len(),
            count
        )));
    }

    // Buffer sizes captured just before this primitive's data lands.
    let vertex_start = scene.vertices.len() as u32;
    let first_index = scene.indices.len() as u32;

    for i in 0..count {
        scene.vertices.push(Vertex {
            position: primitive.positions[i],
            normal: primitive.normals.get(i).copied().unwrap_or([0.0, 0.0, 1.0]),
            tex_coord: primitive.tex_coords.get(i).copied().unwrap_or([0.0, 0.0]),
        });
    }

    // Each index width decodes separately, biased by the running vertex
    // start so sub-meshes resolve inside the shared buffers.
    let push_index = |scene: &mut LoadedScene, raw: u32| -> AssetResult<()> {
        if raw as usize >= count {
            return Err(AssetError::Malformed(format!(
                "index {} out of range for {} vertices",
                raw, count
            )));
        }
        scene.indices.push(raw + vertex_start);
        Ok(())
    };
    match &primitive.indices {
        IndexData::U8(values) => {
            for &v in values {
                push_index(scene, u32::from(v))?;
            }
        }
        IndexData::U16(values) => {
            for &v in values {
                push_index(scene, u32::from(v))?;
            }
        }
        IndexData::U32(values) => {
            for &v in values {
                push_index(scene, v)?;
            }
        }
    }

    Ok(DrawRange {
        first_index,
        index_count: primitive.indices.len() as u32,
        material: primitive.material,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn triangle(material: Option<usize>) -> PrimitiveDesc {
        PrimitiveDesc {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![],
            tex_coords: vec![],
            indices: IndexData::U16(vec![0, 1, 2]),
            material,
        }
    }

    #[test]
    fn trs_composition_matches_equivalent_raw_matrix() {
        let decomposed = NodeDesc {
            translation: Some([1.0, 2.0, 3.0]),
            rotation: Some([0.0, 0.0, 0.0, 1.0]),
            scale: Some([2.0, 2.0, 2.0]),
            ..Default::default()
        };

        let raw = NodeDesc {
            matrix: Some([
                [2.0, 0.0, 0.0, 0.0],
                [0.0, 2.0, 0.0, 0.0],
                [0.0, 0.0, 2.0, 0.0],
                [1.0, 2.0, 3.0, 1.0],
            ]),
            ..Default::default()
        };

        assert_relative_eq!(decomposed.local_matrix(), raw.local_matrix(), epsilon = 1e-6);
    }

    #[test]
    fn raw_matrix_silently_overrides_decomposed_fields() {
        let node = NodeDesc {
            translation: Some([100.0, 0.0, 0.0]),
            matrix: Some([
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ]),
            ..Default::default()
        };
        assert_relative_eq!(node.local_matrix(), Mat4::identity());
    }

    #[test]
    fn missing_decomposed_fields_default_to_identity() {
        let node = NodeDesc::default();
        assert_relative_eq!(node.local_matrix(), Mat4::identity());
    }

    #[test]
    fn indices_are_biased_by_vertex_start_per_width() {
        let document = SceneDocument {
            nodes: vec![NodeDesc {
                mesh: Some(0),
                ..Default::default()
            }],
            roots: vec![0],
            meshes: vec![MeshDesc {
                primitives: vec![
                    PrimitiveDesc {
                        positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                        normals: vec![],
                        tex_coords: vec![],
                        indices: IndexData::U8(vec![0, 1, 2]),
                        material: None,
                    },
                    PrimitiveDesc {
                        positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                        normals: vec![],
                        tex_coords: vec![],
                        indices: IndexData::U32(vec![2, 1, 0]),
                        material: None,
                    },
                ],
            }],
            materials: vec![],
        };

        let scene = load_scene(&document).unwrap();
        assert_eq!(scene.vertices.len(), 6);
        // Second primitive's indices are shifted past the first's vertices.
        assert_eq!(scene.indices, vec![0, 1, 2, 5, 4, 3]);

        let ranges = &scene.nodes[0].primitives;
        assert_eq!(ranges[0].first_index, 0);
        assert_eq!(ranges[1].first_index, 3);
        assert_eq!(ranges[1].index_count, 3);
    }

    #[test]
    fn children_are_appended_before_the_parents_primitives() {
        let document = SceneDocument {
            nodes: vec![
                NodeDesc {
                    mesh: Some(0),
                    children: vec![1],
                    ..Default::default()
                },
                NodeDesc {
                    mesh: Some(0),
                    ..Default::default()
                },
            ],
            roots: vec![0],
            meshes: vec![MeshDesc {
                primitives: vec![triangle(None)],
            }],
            materials: vec![],
        };

        let scene = load_scene(&document).unwrap();
        // The child's range comes first in the shared buffers.
        assert_eq!(scene.nodes[1].primitives[0].first_index, 0);
        assert_eq!(scene.nodes[0].primitives[0].first_index, 3);
    }

    #[test]
    fn world_matrix_walks_the_parent_chain() {
        let document = SceneDocument {
            nodes: vec![
                NodeDesc {
                    translation: Some([1.0, 0.0, 0.0]),
                    children: vec![1],
                    ..Default::default()
                },
                NodeDesc {
                    translation: Some([0.0, 2.0, 0.0]),
                    children: vec![2],
                    ..Default::default()
                },
                NodeDesc {
                    translation: Some([0.0, 0.0, 3.0]),
                    ..Default::default()
                },
            ],
            roots: vec![0],
            meshes: vec![],
            materials: vec![],
        };

        let scene = load_scene(&document).unwrap();
        assert_eq!(scene.nodes[2].parent, Some(1));
        assert_eq!(scene.nodes[1].parent, Some(0));

        let world = scene.world_matrix(2);
        let expected = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(world, expected, epsilon = 1e-6);
    }

    #[test]
    fn out_of_range_child_is_malformed() {
        let document = SceneDocument {
            nodes: vec![NodeDesc {
                children: vec![7],
                ..Default::default()
            }],
            roots: vec![0],
            meshes: vec![],
            materials: vec![],
        };
        assert!(matches!(
            load_scene(&document),
            Err(AssetError::Malformed(_))
        ));
    }

    #[test]
    fn out_of_range_index_is_malformed() {
        let document = SceneDocument {
            nodes: vec![NodeDesc {
                mesh: Some(0),
                ..Default::default()
            }],
            roots: vec![0],
            meshes: vec![MeshDesc {
                primitives: vec![PrimitiveDesc {
                    positions: vec![[0.0; 3]],
                    normals: vec![],
                    tex_coords: vec![],
                    indices: IndexData::U16(vec![0, 1]),
                    material: None,
                }],
            }],
            materials: vec![],
        };
        assert!(load_scene(&document).is_err());
    }

    #[test]
    fn shared_child_is_rejected() {
        let document = SceneDocument {
            nodes: vec![
                NodeDesc {
                    children: vec![2],
                    ..Default::default()
                },
                NodeDesc {
                    children: vec![2],
                    ..Default::default()
                },
                NodeDesc::default(),
            ],
            roots: vec![0, 1],
            meshes: vec![],
            materials: vec![],
        };
        assert!(load_scene(&document).is_err());
    }
}
