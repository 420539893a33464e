use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use common::api::{
    DeleteOrdersRequest, DrinkRequest, DrinksChanged, ErrorBody, OrderId, OrderPlaced,
    OrderRequest, OrderUpdated, OrdersDeleted, PurgeRequest, Purged, RestrictionAdded,
    RestrictionId, RestrictionRemoved, RestrictionRequest, RestrictionToggled,
};
use log::error;
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use warp::http::{Method, StatusCode};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::access::{resolve_client_address, ACCESS_CLOSED_PAGE};
use crate::api::Bar;
use crate::error::BarError;

const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Debug)]
struct AccessDenied;

impl warp::reject::Reject for AccessDenied {}

pub fn routes(
    bar: Bar,
    static_dir: PathBuf,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    access_check(bar.clone())
        .and(api(bar).or(pages(&static_dir)))
        .with(cors())
        .recover(handle_rejection)
        .with(warp::log("bar"))
}

fn api(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    guest_routes(bar.clone()).or(admin_routes(bar))
}

fn guest_routes(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    list_drinks(bar.clone())
        .or(place_order(bar.clone()))
        .or(list_orders(bar.clone()))
        .or(ready_orders(bar.clone()))
        .or(get_order(bar.clone()))
        .or(mark_ready(bar.clone()))
        .or(mark_completed(bar))
}

fn admin_routes(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    admin_drinks(bar.clone())
        .or(add_drink(bar.clone()))
        .or(remove_drink(bar.clone()))
        .or(purge_orders(bar.clone()))
        .or(delete_orders(bar.clone()))
        .or(stats(bar.clone()))
        .or(list_restrictions(bar.clone()))
        .or(add_restriction(bar.clone()))
        .or(toggle_restriction(bar.clone()))
        .or(remove_restriction(bar))
}

fn with_bar(bar: Bar) -> impl Filter<Extract = (Bar,), Error = Infallible> + Clone {
    warp::any().map(move || bar.clone())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn reject(err: BarError) -> Rejection {
    warp::reject::custom(err)
}

fn parse_id(raw: &str, what: &str) -> Result<u64, Rejection> {
    raw.parse::<u64>()
        .map_err(|_| reject(BarError::Validation(format!("Valid {} ID is required", what))))
}

// ---------------------------------------------------------------------------
// Access control
// ---------------------------------------------------------------------------

fn access_check(bar: Bar) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-forwarded-for")
        .and(warp::header::optional::<String>("x-real-ip"))
        .and(warp::addr::remote())
        .and(with_bar(bar))
        .and_then(enforce_access)
        .untuple_one()
}

async fn enforce_access(
    forwarded_for: Option<String>,
    real_ip: Option<String>,
    peer: Option<SocketAddr>,
    bar: Bar,
) -> Result<(), Rejection> {
    let Some(client) =
        resolve_client_address(forwarded_for.as_deref(), real_ip.as_deref(), peer)
    else {
        return Ok(());
    };
    match bar.check_access(&client).await {
        Some(_) => Err(warp::reject::custom(AccessDenied)),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Guest and staff API
// ---------------------------------------------------------------------------

fn list_drinks(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "drinks")
        .and(warp::get())
        .and(with_bar(bar))
        .and_then(|bar: Bar| async move {
            let drinks = bar.drinks().map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&drinks))
        })
}

fn place_order(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "orders")
        .and(warp::post())
        .and(json_body::<OrderRequest>())
        .and(with_bar(bar))
        .and_then(|request: OrderRequest, bar: Bar| async move {
            let order = bar.place_order(request).await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&OrderPlaced {
                id: order.id,
                message: String::from("Order submitted successfully"),
                name: order.name,
                drink: order.drink,
            }))
        })
}

fn list_orders(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "orders")
        .and(warp::get())
        .and(with_bar(bar))
        .and_then(|bar: Bar| async move {
            let orders = bar.orders().await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&orders))
        })
}

fn ready_orders(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "orders" / "ready")
        .and(warp::get())
        .and(with_bar(bar))
        .and_then(|bar: Bar| async move {
            let orders = bar.ready_orders().await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&orders))
        })
}

fn get_order(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "orders" / String)
        .and(warp::get())
        .and(with_bar(bar))
        .and_then(|id: String, bar: Bar| async move {
            let id: OrderId = parse_id(&id, "order")?;
            let order = bar.order(id).await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&order))
        })
}

fn mark_ready(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "orders" / String / "ready")
        .and(warp::put())
        .and(with_bar(bar))
        .and_then(|id: String, bar: Bar| async move {
            let id: OrderId = parse_id(&id, "order")?;
            let order = bar.mark_ready(id).await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&OrderUpdated {
                message: String::from("Order marked as ready"),
                order,
            }))
        })
}

fn mark_completed(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "orders" / String / "complete")
        .and(warp::put())
        .and(with_bar(bar))
        .and_then(|id: String, bar: Bar| async move {
            let id: OrderId = parse_id(&id, "order")?;
            let order = bar.mark_completed(id).await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&OrderUpdated {
                message: String::from("Order marked as complete"),
                order,
            }))
        })
}

// ---------------------------------------------------------------------------
// Admin API
// ---------------------------------------------------------------------------

fn admin_drinks(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "admin" / "drinks")
        .and(warp::get())
        .and(with_bar(bar))
        .and_then(|bar: Bar| async move {
            let drinks = bar.drinks().map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&drinks))
        })
}

fn add_drink(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "admin" / "drinks")
        .and(warp::post())
        .and(json_body::<DrinkRequest>())
        .and(with_bar(bar))
        .and_then(|request: DrinkRequest, bar: Bar| async move {
            let drinks = bar.add_drink(&request.drink).map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&DrinksChanged {
                message: String::from("Drink added successfully"),
                drinks,
            }))
        })
}

fn remove_drink(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "admin" / "drinks" / String)
        .and(warp::delete())
        .and(with_bar(bar))
        .and_then(|raw: String, bar: Bar| async move {
            let drink = percent_decode_str(&raw)
                .decode_utf8()
                .map_err(|_| reject(BarError::validation("Drink name is not valid UTF-8")))?;
            let drinks = bar.remove_drink(&drink).map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&DrinksChanged {
                message: String::from("Drink removed successfully"),
                drinks,
            }))
        })
}

fn purge_orders(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "admin" / "orders" / "purge")
        .and(warp::delete())
        .and(json_body::<PurgeRequest>())
        .and(with_bar(bar))
        .and_then(|request: PurgeRequest, bar: Bar| async move {
            let purged = bar.purge_orders(request.days).await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&Purged {
                message: format!(
                    "Purged {} orders older than {} days",
                    purged,
                    request.days.unwrap_or_default()
                ),
                deleted_count: purged,
            }))
        })
}

fn delete_orders(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "admin" / "orders" / "specific")
        .and(warp::delete())
        .and(json_body::<DeleteOrdersRequest>())
        .and(with_bar(bar))
        .and_then(|request: DeleteOrdersRequest, bar: Bar| async move {
            let deleted = bar.delete_orders(&request.order_ids).await.map_err(reject)?;
            let ids = deleted
                .ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            Ok::<_, Rejection>(warp::reply::json(&OrdersDeleted {
                message: format!(
                    "Successfully deleted {} orders (IDs: {})",
                    deleted.count, ids
                ),
                deleted_count: deleted.count,
                requested_ids: request.order_ids,
                deleted_ids: deleted.ids,
            }))
        })
}

fn stats(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "admin" / "stats")
        .and(warp::get())
        .and(with_bar(bar))
        .and_then(|bar: Bar| async move {
            let stats = bar.stats().await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&stats))
        })
}

fn list_restrictions(
    bar: Bar,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "admin" / "ip-restrictions")
        .and(warp::get())
        .and(with_bar(bar))
        .and_then(|bar: Bar| async move {
            let restrictions = bar.restrictions().await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&restrictions))
        })
}

fn add_restriction(bar: Bar) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "admin" / "ip-restrictions")
        .and(warp::post())
        .and(json_body::<RestrictionRequest>())
        .and(with_bar(bar))
        .and_then(|request: RestrictionRequest, bar: Bar| async move {
            let restriction = bar.add_restriction(request).await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&RestrictionAdded {
                id: restriction.id,
                message: String::from("IP restriction added successfully"),
                subnet: restriction.subnet,
                description: restriction.description,
            }))
        })
}

fn toggle_restriction(
    bar: Bar,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "admin" / "ip-restrictions" / String / "toggle")
        .and(warp::put())
        .and(with_bar(bar))
        .and_then(|id: String, bar: Bar| async move {
            let id: RestrictionId = parse_id(&id, "restriction")?;
            let restriction = bar.toggle_restriction(id).await.map_err(reject)?;
            let action = if restriction.enabled { "enabled" } else { "disabled" };
            Ok::<_, Rejection>(warp::reply::json(&RestrictionToggled {
                message: format!("IP restriction {} successfully", action),
                enabled: restriction.enabled,
            }))
        })
}

fn remove_restriction(
    bar: Bar,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "admin" / "ip-restrictions" / String)
        .and(warp::delete())
        .and(with_bar(bar))
        .and_then(|id: String, bar: Bar| async move {
            let id: RestrictionId = parse_id(&id, "restriction")?;
            let restriction = bar.remove_restriction(id).await.map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&RestrictionRemoved {
                message: String::from("IP restriction deleted successfully"),
                subnet: restriction.subnet,
            }))
        })
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

fn pages(static_dir: &Path) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let index = warp::path::end().and(warp::fs::file(static_dir.join("index.html")));
    let orders = warp::path!("orders").and(warp::fs::file(static_dir.join("orders.html")));
    let status = warp::path!("status").and(warp::fs::file(static_dir.join("status.html")));
    let admin = warp::path!("admin").and(warp::fs::file(static_dir.join("admin.html")));

    warp::get().and(
        index
            .or(orders)
            .or(status)
            .or(admin)
            .or(warp::fs::dir(static_dir.to_path_buf())),
    )
}

fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_methods(&[Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_header("content-type")
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

fn error_reply(status: StatusCode, message: impl Into<String>) -> Response {
    let body = warp::reply::json(&ErrorBody {
        error: message.into(),
    });
    warp::reply::with_status(body, status).into_response()
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.find::<AccessDenied>().is_some() {
        let page = warp::reply::html(ACCESS_CLOSED_PAGE);
        return Ok(warp::reply::with_status(page, StatusCode::FORBIDDEN).into_response());
    }

    let reply = if let Some(e) = err.find::<BarError>() {
        match e {
            BarError::Validation(message) => error_reply(StatusCode::BAD_REQUEST, message.clone()),
            BarError::NotFound(_) => error_reply(StatusCode::NOT_FOUND, e.to_string()),
            BarError::Storage(source) => {
                error!("storage failure: {:#}", source);
                error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        error_reply(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_reply(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        error_reply(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected a JSON body")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else if err.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, "Not found")
    } else {
        error!("unhandled rejection: {:?}", err);
        error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };
    Ok(reply)
}
