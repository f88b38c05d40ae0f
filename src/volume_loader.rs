use crate::{enums::SortBy, volume::ScanVolume, volume::VoxelSize};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use log::debug;
use ndarray::{Array2, Array3, s};
use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult, Limits};

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),
}

const SLICE_EXTENSIONS: [&str; 3] = ["png", "tif", "tiff"];

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a scan from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<ScanVolume, VolumeLoaderError> {
        let mut images_with_order: Vec<_> = dicom_objects
            .iter()
            .filter_map(|dicom_object| Self::extract_image_with_order(dicom_object, &sort_by))
            .collect();

        if images_with_order.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_images(&mut images_with_order, sort_by);

        let images: Vec<_> = images_with_order
            .into_iter()
            .map(|(_, image)| image)
            .collect();

        Self::validate_dimensions(&images)?;

        let spacing = Self::get_spacing(dicom_objects).ok_or(VolumeLoaderError::MissingSpacing)?;
        Ok(ScanVolume::new(Self::build_volume_array(&images), spacing))
    }

    /// Load a scan from DICOM file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<ScanVolume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a scan from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<ScanVolume, VolumeLoaderError> {
        let paths = Self::files_with_extension(path.as_ref(), &["dcm"])?;
        Self::load_from_file_paths(&paths, sort_by)
    }

    /// Load a stack of 2-D slices (png, tif, tiff) ordered by file name.
    ///
    /// Slices carry no physical spacing, so `spacing` is taken as given.
    pub fn load_from_image_stack(
        path: impl AsRef<Path>,
        spacing: VoxelSize,
    ) -> Result<ScanVolume, VolumeLoaderError> {
        let mut paths = Self::files_with_extension(path.as_ref(), &SLICE_EXTENSIONS)?;
        paths.sort();

        let images = paths
            .iter()
            .map(|path| -> Result<Array2<u16>, VolumeLoaderError> {
                debug!("reading slice {}", path.display());
                let luma = image::open(path)?.into_luma16();
                let (width, height) = luma.dimensions();
                Ok(Array2::from_shape_vec(
                    (height as usize, width as usize),
                    luma.into_raw(),
                )?)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::validate_dimensions(&images)?;
        Ok(ScanVolume::new(Self::build_volume_array(&images), spacing))
    }

    /// Load a multi-page TIFF, one page per slice in file order.
    ///
    /// 8- and 16-bit grayscale pages are accepted; 8-bit samples are widened.
    pub fn load_from_tiff(
        path: impl AsRef<Path>,
        spacing: VoxelSize,
    ) -> Result<ScanVolume, VolumeLoaderError> {
        let path = path.as_ref();
        let mut decoder =
            Decoder::new(BufReader::new(File::open(path)?))?.with_limits(Limits::unlimited());

        let mut images = Vec::new();
        loop {
            let (width, height) = decoder.dimensions()?;
            let pixels = match decoder.read_image()? {
                DecodingResult::U16(data) => data,
                DecodingResult::U8(data) => data.into_iter().map(u16::from).collect(),
                _ => {
                    return Err(VolumeLoaderError::UnsupportedPixelFormat(format!(
                        "page {} of {} is not 8/16-bit grayscale",
                        images.len(),
                        path.display()
                    )));
                }
            };
            images.push(Array2::from_shape_vec(
                (height as usize, width as usize),
                pixels,
            )?);

            if !decoder.more_images() {
                break;
            }
            decoder.next_image()?;
        }
        debug!("read {} pages from {}", images.len(), path.display());

        Self::validate_dimensions(&images)?;
        Ok(ScanVolume::new(Self::build_volume_array(&images), spacing))
    }

    fn files_with_extension(
        dir: &Path,
        extensions: &[&str],
    ) -> Result<Vec<PathBuf>, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        Ok(paths)
    }

    fn extract_image_with_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<(Option<f32>, Array2<u16>)> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let image_2d = Self::decode_image(dicom_object)?;
        Some((order, image_2d))
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn sort_images(images_with_order: &mut [(Option<f32>, Array2<u16>)], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            images_with_order
                .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        }

        if matches!(sort_by, SortBy::ImagePositionPatient) {
            images_with_order.reverse();
        }
    }

    fn validate_dimensions(images: &[Array2<u16>]) -> Result<(), VolumeLoaderError> {
        let first_dim = images
            .first()
            .ok_or(VolumeLoaderError::NoValidImages)?
            .dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(images: &[Array2<u16>]) -> Array3<u16> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }

    /// `(slice thickness, row spacing, column spacing)`, matching `(z, y, x)`.
    fn get_spacing(dicom_objects: &[FileDicomObject<InMemDicomObject>]) -> Option<VoxelSize> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float64()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()?
                .to_float64()
                .ok()?;

            Some((slice_thickness, *pixel_spacing.first()?, *pixel_spacing.get(1)?))
        })
    }
}
