use atlantis_capture::{
    CapturedPackage, CustomError, Header, PackageId, PackageType, Request, Response,
    TrafficPackage, WebsocketMessagePackage, WebsocketMessageType, WebsocketPayload,
};
use tracing::trace;

use crate::orchestrator::Atlantis;

pub const GRPC_METHOD: &str = "GRPC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrpcStreamingType {
    Client,
    Server,
    Bidirectional,
}

/// Outcome and metadata of one gRPC call, shared by the unary and streaming helpers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrpcCall {
    pub path: String,
    pub success: bool,
    pub status_code: i32,
    pub status_message: Option<String>,
    pub started_at: Option<f64>,
    pub ended_at: Option<f64>,
    pub request_headers: Vec<Header>,
    pub response_headers: Vec<Header>,
}

pub fn grpc_status_name(code: i32) -> Option<&'static str> {
    let name = match code {
        0 => "ok",
        1 => "cancelled",
        2 => "unknown",
        3 => "invalidArgument",
        4 => "deadlineExceeded",
        5 => "notFound",
        6 => "alreadyExists",
        7 => "permissionDenied",
        8 => "resourceExhausted",
        9 => "failedPrecondition",
        10 => "aborted",
        11 => "outOfRange",
        12 => "unimplemented",
        13 => "internalError",
        14 => "unavailable",
        15 => "dataLoss",
        16 => "unauthenticated",
        -1 => "doNotUse",
        _ => return None,
    };
    Some(name)
}

pub fn grpc_status_description(code: i32) -> String {
    match grpc_status_name(code) {
        Some(name) => format!("{name} (code={code})"),
        None => format!("Unknown status Code {code}"),
    }
}

impl GrpcCall {
    fn request(&self, body: Option<Vec<u8>>) -> Request {
        Request::new(self.path.clone(), GRPC_METHOD, self.request_headers.clone()).with_body(body)
    }

    /// Call status folded into HTTP-shaped response headers.
    fn response(&self) -> Response {
        let mut headers = vec![
            Header::new("success", if self.success { "true" } else { "false" }),
            Header::new("statusCode", grpc_status_description(self.status_code)),
            Header::new(
                "statusMessage",
                self.status_message.as_deref().unwrap_or("nil"),
            ),
        ];
        headers.extend(self.response_headers.iter().cloned());
        Response::new(if self.success { 200 } else { 503 }, headers)
    }

    fn stamp(&self, package: &mut TrafficPackage) {
        if let Some(started_at) = self.started_at {
            package.set_start_at(started_at);
        }
        if let Some(ended_at) = self.ended_at {
            package.complete_at(ended_at, None);
        }
    }
}

impl Atlantis {
    /// Reports a request made outside any capture source as if it had completed.
    pub fn add(&self, request: Request, response: Response, body: Option<Vec<u8>>) {
        let package = TrafficPackage::assembled(
            PackageId::new(),
            request,
            Some(response),
            body,
            PackageType::Http,
        );
        self.inject(CapturedPackage::Traffic(package));
    }

    pub fn add_error(&self, request: Request, error: CustomError) {
        let mut package = TrafficPackage::new(PackageId::new(), request, PackageType::Http);
        package.complete(Some(error));
        self.inject(CapturedPackage::Traffic(package));
    }

    pub fn add_grpc_unary(
        &self,
        call: &GrpcCall,
        request_body: Option<Vec<u8>>,
        response_body: Option<Vec<u8>>,
    ) {
        let mut package = TrafficPackage::assembled(
            PackageId::new(),
            call.request(request_body),
            Some(call.response()),
            response_body,
            PackageType::Http,
        );
        call.stamp(&mut package);
        self.inject(CapturedPackage::Traffic(package));
    }

    /// Reports one streamed gRPC message as a websocket frame on connection `id`.
    pub fn add_grpc_streaming(
        &self,
        id: PackageId,
        call: &GrpcCall,
        message: WebsocketPayload,
        streaming_type: GrpcStreamingType,
        message_type: WebsocketMessageType,
    ) {
        if streaming_type == GrpcStreamingType::Server
            && message_type == WebsocketMessageType::Send
            && !self.config().record_server_send_frames
        {
            trace!(package_id = %id, "skipping server streaming send frame");
            return;
        }

        let (request_body, response_body) = match streaming_type {
            GrpcStreamingType::Client => (None, Some(message.to_bytes())),
            GrpcStreamingType::Server => (Some(message.to_bytes()), None),
            GrpcStreamingType::Bidirectional => (None, None),
        };
        let mut package = TrafficPackage::assembled(
            id.clone(),
            call.request(request_body),
            Some(call.response()),
            response_body,
            PackageType::Websocket,
        );
        call.stamp(&mut package);
        package.set_websocket_message(WebsocketMessagePackage::new(
            id,
            message_type,
            Some(message),
        ));
        self.inject(CapturedPackage::WebSocket(package));
    }
}

#[cfg(test)]
mod tests {
    use super::{GrpcCall, grpc_status_description};
    use atlantis_capture::Header;

    #[test]
    fn status_descriptions() {
        assert_eq!(grpc_status_description(0), "ok (code=0)");
        assert_eq!(grpc_status_description(16), "unauthenticated (code=16)");
        assert_eq!(grpc_status_description(99), "Unknown status Code 99");
    }

    #[test]
    fn failed_call_maps_to_503_with_status_headers() {
        let call = GrpcCall {
            path: "/helloworld.Greeter/SayHello".to_string(),
            success: false,
            status_code: 14,
            status_message: None,
            response_headers: vec![Header::new("grpc-status", "14")],
            ..GrpcCall::default()
        };
        let response = call.response();
        assert_eq!(response.status_code, 503);
        let keys: Vec<_> = response.headers.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["success", "statusCode", "statusMessage", "grpc-status"]);
        assert_eq!(response.headers[1].value, "unavailable (code=14)");
        assert_eq!(response.headers[2].value, "nil");

        let request = call.request(Some(b"{}".to_vec()));
        assert_eq!(request.method, "GRPC");
        assert_eq!(request.body.as_deref(), Some(&b"{}"[..]));
    }
}
