// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Great-circle distance and bounding-box prefilter for nearby searches.
//!
//! The database narrows candidates with a cheap rectangular range query
//! ([`BoundingBox`]); [`rank_within`] then applies the exact haversine radius.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Mean Earth radius in kilometres (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Slack added to each edge of a [`BoundingBox`] to absorb rounding.
const EDGE_PAD_DEG: f64 = 1e-9;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl GeoPoint {
    /// Build a point without validation.
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Reject NaN/infinite and out-of-range coordinates.
    pub fn validate(&self, field: &str) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoreError::validation(
                field,
                format!("latitude {} is outside [-90, 90]", self.lat),
            ));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(CoreError::validation(
                field,
                format!("longitude {} is outside [-180, 180]", self.lng),
            ));
        }
        Ok(())
    }
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Axis-aligned lat/lng rectangle that contains every point within a radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lng: f64,
    /// Eastern edge.
    pub max_lng: f64,
}

impl BoundingBox {
    /// Box around `center` covering `radius_km` on the same sphere as
    /// [`haversine_km`].
    ///
    /// Near the poles, or when the box would wrap the antimeridian, the
    /// longitude range widens to the full [-180, 180].
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        let angular = radius_km.max(0.0) / EARTH_RADIUS_KM;
        let dlat = angular.to_degrees() + EDGE_PAD_DEG;
        let min_lat = (center.lat - dlat).max(-90.0);
        let max_lat = (center.lat + dlat).min(90.0);

        // Widest longitude of the spherical cap: asin(sin(d) / cos(lat)).
        let reach = angular.min(std::f64::consts::FRAC_PI_2).sin()
            / center.lat.to_radians().cos();
        let (min_lng, max_lng) = if !(0.0..1.0).contains(&reach)
            || min_lat <= -90.0
            || max_lat >= 90.0
        {
            (-180.0, 180.0)
        } else {
            let dlng = reach.asin().to_degrees() + EDGE_PAD_DEG;
            let (lo, hi) = (center.lng - dlng, center.lng + dlng);
            if lo < -180.0 || hi > 180.0 {
                (-180.0, 180.0)
            } else {
                (lo, hi)
            }
        };

        Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    /// Whether the point lies inside the box (edges included).
    pub fn contains(&self, p: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&p.lat)
            && (self.min_lng..=self.max_lng).contains(&p.lng)
    }
}

/// Keep candidates within `radius_km` of `center`, nearest first.
///
/// Returns each candidate paired with its distance.
pub fn rank_within<T>(
    center: GeoPoint,
    radius_km: f64,
    candidates: impl IntoIterator<Item = (T, GeoPoint)>,
) -> Vec<(T, f64)> {
    let mut ranked: Vec<(T, f64)> = candidates
        .into_iter()
        .map(|(item, point)| (item, haversine_km(center, point)))
        .filter(|(_, d)| *d <= radius_km)
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranked
}
