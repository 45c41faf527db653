//! Polygonal surface meshes and their mass properties.
//!
//! Particle surfaces are closed triangle meshes; contact regions are quad
//! patches. Both are stored as a vertex list plus polygon index lists, loaded
//! from Wavefront OBJ (via `tobj`) or VTK poly data, and written back as OBJ.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;
use nalgebra::Point3;

use crate::error::{Result, StatsError};
use crate::geomio::{CellKind, PointSet};

/// Normalisation constant making the shape index of a sphere equal to one.
pub const SPHERE_SHAPE_INDEX: f64 = 2.199085233;


/// Integral properties of a closed triangulated surface.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MassProperties {
    pub volume: f64,
    pub surface_area: f64,
    pub min_cell_area: f64,
    pub max_cell_area: f64,
    pub normalized_shape_index: f64,
}

impl MassProperties {
    /// Surface integrals over a triangle soup.
    ///
    /// Volume is the sum of signed tetrahedra spanned by each triangle and a
    /// reference point (the vertex mean, for conditioning); its absolute value
    /// is returned so either consistent winding works.
    pub fn of_triangles(
        vertices: &[Point3<f64>],
        triangles: impl Iterator<Item = [usize; 3]>,
    ) -> Option<Self> {
        let reference = vertex_mean(vertices)?;

        let mut signed_volume = 0.0;
        let mut surface_area = 0.0;
        let mut min_cell_area = f64::INFINITY;
        let mut max_cell_area = 0.0f64;
        let mut num_triangles = 0usize;

        for [a, b, c] in triangles {
            let v0 = vertices[a] - reference;
            let v1 = vertices[b] - reference;
            let v2 = vertices[c] - reference;

            signed_volume += v0.dot(&v1.cross(&v2)) / 6.0;

            let area = 0.5 * (v1 - v0).cross(&(v2 - v0)).norm();
            surface_area += area;
            min_cell_area = min_cell_area.min(area);
            max_cell_area = max_cell_area.max(area);
            num_triangles += 1;
        }

        if num_triangles == 0 {
            return None;
        }

        let volume = signed_volume.abs();
        let normalized_shape_index = if volume > 0.0 {
            surface_area.sqrt() / volume.cbrt() / SPHERE_SHAPE_INDEX
        } else {
            0.0
        };

        Some(Self {
            volume: finite_or_zero(volume),
            surface_area: finite_or_zero(surface_area),
            min_cell_area: finite_or_zero(min_cell_area),
            max_cell_area: finite_or_zero(max_cell_area),
            normalized_shape_index: finite_or_zero(normalized_shape_index),
        })
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn vertex_mean(vertices: &[Point3<f64>]) -> Option<Point3<f64>> {
    if vertices.is_empty() {
        return None;
    }
    let sum = vertices
        .iter()
        .fold(Point3::origin(), |acc: Point3<f64>, p| acc + p.coords);
    Some(sum / vertices.len() as f64)
}

/// A polygon mesh: shared vertices plus faces as vertex index lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceMesh {
    pub vertices: Vec<Point3<f64>>,
    pub faces: Vec<Vec<usize>>,
}

impl SurfaceMesh {
    pub fn new(vertices: Vec<Point3<f64>>, faces: Vec<Vec<usize>>) -> Self {
        Self { vertices, faces }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Loads a mesh, choosing the reader from the file extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(StatsError::MissingFile(path.to_path_buf()));
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("obj") => Self::from_obj(path),
            Some("vtp") | Some("vtu") | Some("vtk") => {
                Ok(Self::from_point_set(PointSet::from_vtk(path)?))
            }
            other => Err(StatsError::format(
                path,
                format!("unsupported mesh extension {:?}", other),
            )),
        }
    }

    /// Surface faces of a point set: polygons as they are, strips split into
    /// triangles. Vertices, lines and volume cells are dropped.
    pub fn from_point_set(set: PointSet) -> Self {
        let mut faces = Vec::with_capacity(set.cells.len());
        let mut skipped = 0usize;
        for (kind, cell) in set.typed_cells() {
            match kind {
                CellKind::Polygon => faces.push(cell.to_vec()),
                CellKind::Strip => faces.extend(strip_triangles(cell).map(|t| t.to_vec())),
                CellKind::Vertex | CellKind::Line | CellKind::Other => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(
                "{}: ignored {} non-surface cells",
                set.source().display(),
                skipped
            );
        }
        Self::new(set.points, faces)
    }

    fn from_obj(path: &Path) -> Result<Self> {
        let (models, _) = tobj::load_obj(path, &tobj::LoadOptions::default())
            .map_err(|e| StatsError::format(path, e.to_string()))?;

        let mut mesh = SurfaceMesh::default();

        // indices are local to each model
        for m in models.iter() {
            let offset = mesh.vertices.len();
            let positions = &m.mesh.positions;
            for vtx in 0..positions.len() / 3 {
                mesh.vertices.push(Point3::new(
                    positions[3 * vtx],
                    positions[3 * vtx + 1],
                    positions[3 * vtx + 2],
                ));
            }

            let indices = &m.mesh.indices;
            if m.mesh.face_arities.is_empty() {
                // all triangles
                for tri in indices.chunks_exact(3) {
                    mesh.faces
                        .push(tri.iter().map(|&i| offset + i as usize).collect());
                }
            } else {
                let mut next_face = 0;
                for &arity in &m.mesh.face_arities {
                    let end = next_face + arity as usize;
                    let face = indices[next_face..end]
                        .iter()
                        .map(|&i| offset + i as usize)
                        .collect();
                    mesh.faces.push(face);
                    next_face = end;
                }
            }
        }

        debug!(
            "loaded {}: {} vertices, {} faces",
            path.display(),
            mesh.vertices.len(),
            mesh.faces.len()
        );

        Ok(mesh)
    }

    /// Writes the mesh as OBJ with shortest round-trip float formatting, so a
    /// reload reproduces the coordinates bit for bit.
    pub fn write_obj(&self, path: &Path, name: &str) -> Result<()> {
        let file = File::create(path).map_err(|e| StatsError::io(path, e))?;
        let mut writer = BufWriter::new(file);

        let write_all = |writer: &mut BufWriter<File>| -> std::io::Result<()> {
            writeln!(writer, "o {}", name)?;
            for v in &self.vertices {
                writeln!(writer, "v {:?} {:?} {:?}", v.x, v.y, v.z)?;
            }
            for face in &self.faces {
                write!(writer, "f")?;
                for i in face {
                    write!(writer, " {}", i + 1)?;
                }
                writeln!(writer)?;
            }
            writer.flush()
        };

        write_all(&mut writer).map_err(|e| StatsError::io(path, e))
    }

    /// Fan triangulation of every face with at least three vertices.
    pub fn triangles(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        self.faces
            .iter()
            .filter(|face| face.len() >= 3)
            .flat_map(|face| (1..face.len() - 1).map(move |i| [face[0], face[i], face[i + 1]]))
    }

    /// `None` when the mesh has no vertices or no triangles.
    pub fn mass_properties(&self) -> Option<MassProperties> {
        if self.vertices.is_empty() {
            return None;
        }
        MassProperties::of_triangles(&self.vertices, self.triangles())
    }
}

/// Triangles of a strip, flipping every other one so all share the winding
/// of the first.
pub fn strip_triangles(strip: &[usize]) -> impl Iterator<Item = [usize; 3]> + '_ {
    strip.windows(3).enumerate().map(|(i, w)| {
        if i % 2 == 0 {
            [w[0], w[1], w[2]]
        } else {
            [w[1], w[0], w[2]]
        }
    })
}
