use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{MatchedPath, Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, today};
use crate::model::*;
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route(
            "/parkingallocations",
            get(list_allocations).post(create_allocation),
        )
        .route("/parkingallocations/search", get(search_allocations))
        .route(
            "/parkingallocations/by-vehicle/{vehicle_id}",
            get(allocations_by_vehicle),
        )
        .route("/parkingallocations/by-lot/{lot_id}", get(allocations_by_lot))
        .route(
            "/parkingallocations/{id}",
            get(get_allocation)
                .put(update_allocation)
                .delete(delete_allocation),
        )
        .route("/parkinglots", get(list_lots).post(create_lot))
        .route("/parkinglots/seed", post(seed_lots))
        .route("/parkinglots/search", get(search_lots))
        .route("/parkinglots/{id}", get(get_lot))
        .route("/vehicles", get(list_vehicles).post(register_vehicle))
        .route("/vehicles/search-by-plate", get(search_vehicles_by_plate))
        .route("/vehicles/by-user/{user_id}", get(vehicles_by_user))
        .route("/vehicles/{id}", get(get_vehicle))
        .route("/health", get(health))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

/// Record request count and latency keyed by the matched route template.
async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        observability::REQUESTS_TOTAL,
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        observability::REQUEST_DURATION_SECONDS,
        "method" => method,
        "path" => path
    )
    .record(started.elapsed().as_secs_f64());
    response
}

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Engine(e) => match e {
                EngineError::InvalidDateRange | EngineError::LimitExceeded(_) => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                EngineError::AlreadyExists(_)
                | EngineError::SlotAlreadyBooked { .. }
                | EngineError::VehicleAlreadyAllocated(_) => (StatusCode::CONFLICT, e.to_string()),
                EngineError::PersistenceFailure(_) => {
                    tracing::error!("internal server error: {e}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_string(),
                    )
                }
            },
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ── Wire types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAllocationRequest {
    pub vehicle_id: Ulid,
    pub parking_lot_id: Ulid,
    pub allocated_from_date: NaiveDate,
    pub allocated_upto_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAllocationRequest {
    pub parking_lot_id: Ulid,
    pub allocated_from_date: NaiveDate,
    pub allocated_upto_date: NaiveDate,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResponse {
    pub allocation_id: Ulid,
    pub vehicle_id: Ulid,
    pub parking_lot_id: Ulid,
    pub number_plate: String,
    pub lot_number: String,
    pub lot_location: Option<String>,
    pub allocated_from_date: NaiveDate,
    pub allocated_upto_date: NaiveDate,
    pub allocated_days: i64,
}

impl From<AllocationInfo> for AllocationResponse {
    fn from(info: AllocationInfo) -> Self {
        Self {
            allocation_id: info.id,
            vehicle_id: info.vehicle_id,
            parking_lot_id: info.lot_id,
            number_plate: info.number_plate,
            lot_number: info.lot_number,
            lot_location: info.lot_location,
            allocated_from_date: info.from,
            allocated_upto_date: info.to,
            allocated_days: info.allocated_days,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLotRequest {
    pub lot_number: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LotResponse {
    pub parking_lot_id: Ulid,
    pub lot_number: String,
    pub location: Option<String>,
    /// Only present on the full listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_occupied: Option<bool>,
}

impl From<ParkingLot> for LotResponse {
    fn from(lot: ParkingLot) -> Self {
        Self {
            parking_lot_id: lot.id,
            lot_number: lot.lot_number,
            location: lot.location,
            is_occupied: None,
        }
    }
}

impl From<LotInfo> for LotResponse {
    fn from(lot: LotInfo) -> Self {
        Self {
            parking_lot_id: lot.id,
            lot_number: lot.lot_number,
            location: lot.location,
            is_occupied: Some(lot.is_occupied),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterVehicleRequest {
    pub user_id: Ulid,
    #[serde(rename = "type")]
    pub kind: String,
    pub number_plate: String,
    pub make: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleResponse {
    pub vehicle_id: Ulid,
    pub user_id: Ulid,
    #[serde(rename = "type")]
    pub kind: String,
    pub number_plate: String,
    pub make: String,
    pub color: Option<String>,
}

impl From<Vehicle> for VehicleResponse {
    fn from(v: Vehicle) -> Self {
        Self {
            vehicle_id: v.id,
            user_id: v.user_id,
            kind: v.kind,
            number_plate: v.number_plate,
            make: v.make,
            color: v.color,
        }
    }
}

/// `?from=YYYY-MM-DD&to=YYYY-MM-DD`. Missing or malformed dates are an
/// invalid range rather than an extractor rejection.
#[derive(Debug, Deserialize)]
pub struct DateWindowQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl DateWindowQuery {
    fn parse(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>), ApiError> {
        Ok((parse_date(self.from.as_deref())?, parse_date(self.to.as_deref())?))
    }
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::Engine(EngineError::InvalidDateRange)),
    }
}

#[derive(Debug, Deserialize)]
pub struct PlateQuery {
    pub plate: Option<String>,
}

fn non_empty(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

fn created<T: Serialize>(location: String, body: T) -> Response {
    (
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(body),
    )
        .into_response()
}

// ── Allocations ──────────────────────────────────────────────

async fn list_allocations(State(state): State<AppState>) -> Json<Vec<AllocationResponse>> {
    let all = state.engine.list_allocations().await;
    Json(all.into_iter().map(Into::into).collect())
}

async fn get_allocation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<AllocationResponse>, ApiError> {
    let info = state
        .engine
        .get_allocation(&id)
        .await
        .ok_or(EngineError::NotFound(id))?;
    Ok(Json(info.into()))
}

async fn allocations_by_vehicle(
    State(state): State<AppState>,
    Path(vehicle_id): Path<Ulid>,
) -> Json<Vec<AllocationResponse>> {
    let found = state.engine.allocations_for_vehicle(&vehicle_id).await;
    Json(found.into_iter().map(Into::into).collect())
}

async fn allocations_by_lot(
    State(state): State<AppState>,
    Path(lot_id): Path<Ulid>,
) -> Json<Vec<AllocationResponse>> {
    let found = state.engine.allocations_for_lot(&lot_id).await;
    Json(found.into_iter().map(Into::into).collect())
}

async fn search_allocations(
    State(state): State<AppState>,
    Query(query): Query<DateWindowQuery>,
) -> Result<Json<Vec<AllocationResponse>>, ApiError> {
    let (from, to) = query.parse()?;
    let found = state.engine.allocations_in_range(from, to).await?;
    Ok(Json(found.into_iter().map(Into::into).collect()))
}

async fn create_allocation(
    State(state): State<AppState>,
    Json(req): Json<CreateAllocationRequest>,
) -> Result<Response, ApiError> {
    let info = state
        .engine
        .create_allocation(
            Ulid::new(),
            req.vehicle_id,
            req.parking_lot_id,
            req.allocated_from_date,
            req.allocated_upto_date,
        )
        .await?;
    Ok(created(
        format!("/parkingallocations/{}", info.id),
        AllocationResponse::from(info),
    ))
}

async fn update_allocation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Json(req): Json<UpdateAllocationRequest>,
) -> Result<Json<AllocationResponse>, ApiError> {
    let info = state
        .engine
        .update_allocation(
            id,
            req.parking_lot_id,
            req.allocated_from_date,
            req.allocated_upto_date,
        )
        .await?;
    Ok(Json(info.into()))
}

async fn delete_allocation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    if state.engine.delete_allocation(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(EngineError::NotFound(id).into())
    }
}

// ── Lots ─────────────────────────────────────────────────────

async fn list_lots(State(state): State<AppState>) -> Json<Vec<LotResponse>> {
    let lots = state.engine.list_lots(today()).await;
    Json(lots.into_iter().map(Into::into).collect())
}

async fn get_lot(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<LotResponse>, ApiError> {
    let lot = state
        .engine
        .get_lot(&id)
        .await
        .ok_or(EngineError::NotFound(id))?;
    Ok(Json(lot.into()))
}

async fn create_lot(
    State(state): State<AppState>,
    Json(req): Json<CreateLotRequest>,
) -> Result<Response, ApiError> {
    non_empty(&req.lot_number, "lotNumber")?;
    let lot = state
        .engine
        .create_lot(Ulid::new(), req.lot_number.trim().to_string(), req.location)
        .await?;
    Ok(created(
        format!("/parkinglots/{}", lot.id),
        LotResponse::from(lot),
    ))
}

async fn seed_lots(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let created = state.engine.seed_lots().await?;
    Ok(Json(json!({ "created": created })))
}

async fn search_lots(
    State(state): State<AppState>,
    Query(query): Query<DateWindowQuery>,
) -> Result<Json<Vec<LotResponse>>, ApiError> {
    let (from, to) = query.parse()?;
    let free = state.engine.search_available_lots(from, to).await?;
    Ok(Json(free.into_iter().map(Into::into).collect()))
}

// ── Vehicles ─────────────────────────────────────────────────

async fn list_vehicles(State(state): State<AppState>) -> Json<Vec<VehicleResponse>> {
    let vehicles = state.engine.list_vehicles().await;
    Json(vehicles.into_iter().map(Into::into).collect())
}

async fn get_vehicle(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<VehicleResponse>, ApiError> {
    let vehicle = state
        .engine
        .get_vehicle(&id)
        .await
        .ok_or(EngineError::NotFound(id))?;
    Ok(Json(vehicle.into()))
}

async fn vehicles_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<Ulid>,
) -> Json<Vec<VehicleResponse>> {
    let vehicles = state.engine.vehicles_for_user(user_id).await;
    Json(vehicles.into_iter().map(Into::into).collect())
}

async fn search_vehicles_by_plate(
    State(state): State<AppState>,
    Query(query): Query<PlateQuery>,
) -> Result<Json<Vec<VehicleResponse>>, ApiError> {
    let plate = query.plate.unwrap_or_default();
    non_empty(&plate, "plate")?;
    let vehicles = state.engine.find_vehicles_by_plate(plate.trim()).await;
    Ok(Json(vehicles.into_iter().map(Into::into).collect()))
}

async fn register_vehicle(
    State(state): State<AppState>,
    Json(req): Json<RegisterVehicleRequest>,
) -> Result<Response, ApiError> {
    non_empty(&req.number_plate, "numberPlate")?;
    let vehicle = state
        .engine
        .register_vehicle(Vehicle {
            id: Ulid::new(),
            user_id: req.user_id,
            kind: req.kind,
            number_plate: req.number_plate.trim().to_string(),
            make: req.make,
            color: req.color,
        })
        .await?;
    Ok(created(
        format!("/vehicles/{}", vehicle.id),
        VehicleResponse::from(vehicle),
    ))
}

async fn health() -> &'static str {
    "ok"
}
