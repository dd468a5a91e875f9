//! HTTP behaviour of the Proxmox client against a mock API.

use reqwest::Url;
use serde_json::json;
use vmlab_harness::{ClusterService, ImageDownload, ServiceError, VmOptions, VmStatus};
use vmlab_id::{Upid, VmId};
use vmlab_proxmox::{Config, ProxmoxClient, Secret};
use vmlab_tasks::TaskStatus;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CREATE_UPID: &str = "UPID:pve:0000A1B2:0012C3D4:6720F1E5:qmcreate:142:root@pam:";

fn config(server: &MockServer, username: &str) -> Config {
    Config {
        username: username.to_string(),
        password: Secret::new("secret"),
        url: Url::parse(&format!("{}/api2/json", server.uri())).unwrap(),
        node: "pve".to_string(),
        insecure_tls: false,
    }
}

fn token_client(server: &MockServer) -> ProxmoxClient {
    ProxmoxClient::new(config(server, "root@pam!ci")).unwrap()
}

fn data(value: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": value }))
}

fn vm(id: u32) -> VmId {
    VmId::new(id).unwrap()
}

#[tokio::test]
async fn test_next_id_with_api_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/nextid"))
        .and(header("Authorization", "PVEAPIToken=root@pam!ci=secret"))
        .respond_with(data(json!("142")))
        .expect(1)
        .mount(&server)
        .await;

    let id = token_client(&server).next_id().await.unwrap();
    assert_eq!(id, vm(142));
}

#[tokio::test]
async fn test_ticket_login_happens_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api2/json/access/ticket"))
        .and(body_string_contains("password=secret"))
        .respond_with(data(json!({
            "ticket": "PVE:root@pam:6720F1E5::signature",
            "CSRFPreventionToken": "6720F1E5:csrf",
            "username": "root@pam",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve/qemu/142/status/start"))
        .and(header("Cookie", "PVEAuthCookie=PVE:root@pam:6720F1E5::signature"))
        .and(header("CSRFPreventionToken", "6720F1E5:csrf"))
        .respond_with(data(json!(
            "UPID:pve:0000A1B3:0012C3D5:6720F1E6:qmstart:142:root@pam:"
        )))
        .expect(2)
        .mount(&server)
        .await;

    let client = ProxmoxClient::new(config(&server, "root@pam")).unwrap();
    let first = client.start_vm(vm(142)).await.unwrap();
    client.start_vm(vm(142)).await.unwrap();

    assert_eq!(first.task_type(), "qmstart");
}

#[tokio::test]
async fn test_failed_login_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api2/json/access/ticket"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = ProxmoxClient::new(config(&server, "root@pam")).unwrap();
    let err = client.next_id().await.unwrap_err();

    assert!(matches!(err, ServiceError::Rejected { status: 401, .. }));
}

#[tokio::test]
async fn test_create_sends_vmid_and_options() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve/qemu"))
        .and(body_string_contains("vmid=142"))
        .and(body_string_contains("name=alpha"))
        .respond_with(data(json!(CREATE_UPID)))
        .expect(1)
        .mount(&server)
        .await;

    let upid = token_client(&server)
        .create_vm(vm(142), &VmOptions::new().with("name", "alpha"))
        .await
        .unwrap();

    assert_eq!(upid.as_str(), CREATE_UPID);
    assert_eq!(upid.vm_id(), Some(vm(142)));
}

#[tokio::test]
async fn test_configure_sends_options() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve/qemu/142/config"))
        .and(body_string_contains("cores=2"))
        .and(body_string_contains("memory=4096"))
        .respond_with(data(json!(
            "UPID:pve:0000A1B4:0012C3D6:6720F1E7:qmconfig:142:root@pam:"
        )))
        .expect(1)
        .mount(&server)
        .await;

    let options = VmOptions::new().with("cores", 2).with("memory", 4096);
    let upid = token_client(&server)
        .configure_vm(vm(142), &options)
        .await
        .unwrap();
    assert_eq!(upid.task_type(), "qmconfig");
}

#[tokio::test]
async fn test_task_status_is_read_from_upid_node() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api2/json/nodes/pve/tasks/UPID.+/status$"))
        .respond_with(data(json!({
            "status": "stopped",
            "exitstatus": "can't lock file '/var/lock/qemu-server/lock-142.conf' - got timeout",
            "type": "qmcreate",
        })))
        .mount(&server)
        .await;

    let upid = Upid::parse(CREATE_UPID).unwrap();
    let status = token_client(&server).task_status(&upid).await.unwrap();

    assert_eq!(
        status,
        TaskStatus::Failure(
            "can't lock file '/var/lock/qemu-server/lock-142.conf' - got timeout".to_string()
        )
    );
}

#[tokio::test]
async fn test_running_task_is_pending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api2/json/nodes/pve/tasks/.+/status$"))
        .respond_with(data(json!({ "status": "running" })))
        .mount(&server)
        .await;

    let upid = Upid::parse(CREATE_UPID).unwrap();
    let status = token_client(&server).task_status(&upid).await.unwrap();
    assert_eq!(status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_vm_status_and_ping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve/qemu/142/status/current"))
        .respond_with(data(json!({ "status": "running", "vmid": 142 })))
        .mount(&server)
        .await;

    let client = token_client(&server);
    assert_eq!(client.vm_status(vm(142)).await.unwrap(), VmStatus::Running);
    assert!(client.ping_vm(vm(142)).await.unwrap());
}

#[tokio::test]
async fn test_missing_vm_is_absent_and_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve/qemu/999/status/current"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "data": null,
            "message": "Configuration file 'nodes/pve/qemu-server/999.conf' does not exist\n",
        })))
        .mount(&server)
        .await;

    let client = token_client(&server);
    assert_eq!(client.vm_status(vm(999)).await.unwrap(), VmStatus::Absent);
    assert!(!client.ping_vm(vm(999)).await.unwrap());
}

#[tokio::test]
async fn test_parameter_error_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve/qemu/142/config"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "data": null,
            "message": "Parameter verification failed.\n",
            "errors": { "memory": "value must have a minimum value of 16" },
        })))
        .mount(&server)
        .await;

    let err = token_client(&server)
        .configure_vm(vm(142), &VmOptions::new().with("memory", 1))
        .await
        .unwrap_err();

    match err {
        ServiceError::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("memory: value must have a minimum value of 16"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_download_image_requests_import_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve/storage/local/download-url"))
        .and(body_string_contains("content=import"))
        .and(body_string_contains("filename=leap.qcow2"))
        .respond_with(data(json!(
            "UPID:pve:0000A1B5:0012C3D7:6720F1E8:download:leap.qcow2:root@pam:"
        )))
        .expect(1)
        .mount(&server)
        .await;

    let request = ImageDownload {
        storage: "local".to_string(),
        url: "https://download.opensuse.org/leap.qcow2".to_string(),
        filename: "leap.qcow2".to_string(),
    };
    let upid = token_client(&server).download_image(&request).await.unwrap();

    assert_eq!(upid.task_type(), "download");
    assert_eq!(upid.vm_id(), None);
}

#[tokio::test]
async fn test_garbled_response_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api2/json/cluster/nextid"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = token_client(&server).next_id().await.unwrap_err();
    assert!(matches!(err, ServiceError::Protocol(_)));
}

#[tokio::test]
async fn test_closed_port_is_unreachable() {
    let config = Config {
        username: "root@pam!ci".to_string(),
        password: Secret::new("secret"),
        url: Url::parse("http://127.0.0.1:1/api2/json").unwrap(),
        node: "pve".to_string(),
        insecure_tls: false,
    };

    let err = ProxmoxClient::new(config)
        .unwrap()
        .next_id()
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unreachable(_)));
}
