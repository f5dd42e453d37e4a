//! End-to-end workloads. Each test drives the router the way the browser
//! client does: sign in, keep the session cookie, call the JSON API.

use axum::{
    body::Body,
    extract::Request,
    http::{
        HeaderValue, Method, StatusCode,
        header::{self, CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE},
    },
};
use axum_test::TestServer;
use diesel::prelude::*;
use serde_json::{Value, json};

use crate::{
    auth::{Role, User},
    schema::group_members,
    test::{
        TestApp, insert_group, insert_presentation, insert_user_with_password,
        multipart_body,
    },
};

const PASSWORD: &str = "password";

// This is a macro rather than a function so that a failing assertion points
// at the call site.
macro_rules! assert_status {
    ($res:expr, $status:expr) => {
        let (status, body, _) = $res;
        assert_eq!(status, $status, "body = {body}");
    };
}

#[tokio::test]
async fn reset_code_login_forces_a_new_password() {
    let app = TestApp::new();
    app.with_conn(|conn| {
        User::create("lovelace", "Ada", None, Role::Student, "AbCd1234", conn)
            .unwrap();
    });

    let (status, body, cookie) = app
        .json(
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "nom": "lovelace", "password": "AbCd1234" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["requirePasswordReset"], json!(true));
    assert_eq!(body["user"]["firstName"], json!("Ada"));
    let pending = cookie.unwrap();

    // the pending session only unlocks set-password
    assert_status!(
        app.json(Method::GET, "/api/me", Some(&pending), None).await,
        StatusCode::FORBIDDEN
    );
    assert_status!(
        app.json(
            Method::POST,
            "/api/set-password",
            Some(&pending),
            Some(json!({ "newPassword": "abc" })),
        )
        .await,
        StatusCode::BAD_REQUEST
    );

    let (status, body, cookie) = app
        .json(
            Method::POST,
            "/api/set-password",
            Some(&pending),
            Some(json!({ "newPassword": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let full = cookie.unwrap();

    let (status, body, _) =
        app.json(Method::GET, "/api/me", Some(&full), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], json!("lovelace"));
    assert_eq!(body["role"], json!("STUDENT"));

    // the code is single-use
    assert_status!(
        app.json(
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "name": "lovelace", "password": "AbCd1234" })),
        )
        .await,
        StatusCode::UNAUTHORIZED
    );

    let (status, body, _) = app
        .json(
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "name": "lovelace", "password": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("requirePasswordReset").is_none());
}

#[tokio::test]
async fn passwords_are_kept_exactly_as_typed() {
    let app = TestApp::new();
    app.with_conn(|conn| {
        User::create("hopper", "Grace", None, Role::Student, "Zx12Cv34", conn)
            .unwrap();
    });

    let (status, _, cookie) = app
        .json(
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "name": "hopper", "password": "Zx12Cv34" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let pending = cookie.unwrap();

    // blank padding does not count towards the minimum length
    assert_status!(
        app.json(
            Method::POST,
            "/api/set-password",
            Some(&pending),
            Some(json!({ "newPassword": "  ab  " })),
        )
        .await,
        StatusCode::BAD_REQUEST
    );
    assert_status!(
        app.json(
            Method::POST,
            "/api/set-password",
            Some(&pending),
            Some(json!({ "newPassword": "  secret  " })),
        )
        .await,
        StatusCode::OK
    );

    app.login("hopper", "  secret  ").await;
    assert_status!(
        app.json(
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "name": "hopper", "password": "secret" })),
        )
        .await,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn malformed_bodies_get_json_errors() {
    let app = TestApp::new();
    let x = app.with_conn(|conn| {
        let red = insert_group(conn, "Red");
        let blue = insert_group(conn, "Blue");
        insert_user_with_password(conn, "a", Role::Student, Some(&blue), PASSWORD);
        insert_presentation(conn, &red, "X")
    });
    let a = app.login("a", PASSWORD).await;
    let rate = format!("/api/presentations/{x}/rate");

    for bad in [
        json!({ "rating": "15" }),
        json!({ "rating": true }),
        json!({ "rating": {} }),
    ] {
        let (status, body, _) =
            app.json(Method::POST, &rate, Some(&a), Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body["error"], json!("bad_request"));
        assert!(body["message"].is_string());
    }

    // a body without a JSON content type
    let res = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/login")
                .body(Body::from(r#"{"name":"a","password":"password"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(
        &axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(body["error"], json!("bad_request"));

    // unparseable JSON
    let res = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri(rate.as_str())
                .header(COOKIE, &a)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from("{\"rating\":"))
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    app.with_conn(|conn| {
        let point = crate::presentations::Presentation::fetch(&x, conn)
            .unwrap()
            .point;
        assert_eq!(point, None);
    });
}

#[tokio::test]
async fn students_without_a_group_cannot_rate() {
    let app = TestApp::new();
    let x = app.with_conn(|conn| {
        let red = insert_group(conn, "Red");
        insert_user_with_password(conn, "l", Role::Student, None, PASSWORD);
        insert_presentation(conn, &red, "X")
    });
    let l = app.login("l", PASSWORD).await;

    let (status, body, _) = app
        .json(
            Method::POST,
            &format!("/api/presentations/{x}/rate"),
            Some(&l),
            Some(json!({ "rating": 12 })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["error"], json!("forbidden"));

    let (_, body, _) = app
        .json(
            Method::GET,
            &format!("/api/presentations/details/{x}"),
            Some(&l),
            None,
        )
        .await;
    assert_eq!(body["presentation"]["point"], Value::Null);
    assert_eq!(body["hasRated"], json!(false));
}

#[tokio::test]
async fn requests_without_a_session_are_rejected() {
    let app = TestApp::new();

    let (status, body, _) = app
        .json(Method::GET, "/api/presentations/active", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("unauthorized"));

    assert_status!(
        app.json(
            Method::GET,
            "/api/me",
            Some("presdesk_session=forged"),
            None
        )
        .await,
        StatusCode::UNAUTHORIZED
    );
    assert_status!(
        app.json(
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "name": "nobody" })),
        )
        .await,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn outside_ratings_are_averaged() {
    let app = TestApp::new();
    let x = app.with_conn(|conn| {
        let red = insert_group(conn, "Red");
        let blue = insert_group(conn, "Blue");
        let x = insert_presentation(conn, &red, "X");
        insert_user_with_password(conn, "a", Role::Student, Some(&blue), PASSWORD);
        insert_user_with_password(conn, "b", Role::Student, Some(&blue), PASSWORD);
        insert_user_with_password(conn, "m", Role::Student, Some(&red), PASSWORD);
        x
    });

    let a = app.login("a", PASSWORD).await;
    let b = app.login("b", PASSWORD).await;
    let m = app.login("m", PASSWORD).await;
    let rate = format!("/api/presentations/{x}/rate");

    let (status, body, _) = app
        .json(Method::POST, &rate, Some(&a), Some(json!({ "rating": 10 })))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["newPoint"], json!(10.0));
    assert_eq!(body["isUpdate"], json!(false));

    let (status, body, _) = app
        .json(Method::POST, &rate, Some(&b), Some(json!({ "rating": 16 })))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["newPoint"], json!(13.0));
    assert_eq!(body["totalRatings"], json!(2));

    let (status, body, _) = app
        .json(Method::POST, &rate, Some(&m), Some(json!({ "rating": 20 })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("forbidden"));

    assert_status!(
        app.json(Method::POST, &rate, Some(&a), Some(json!({ "rating": 21 })))
            .await,
        StatusCode::BAD_REQUEST
    );

    let details = format!("/api/presentations/details/{x}");
    let (status, body, _) =
        app.json(Method::GET, &details, Some(&a), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["presentation"]["point"], json!(13.0));
    assert_eq!(body["group"]["name"], json!("Red"));
    assert_eq!(body["userType"], json!("student_not_in_group"));
    assert_eq!(body["permissions"]["canRate"], json!(true));
    assert_eq!(body["hasRated"], json!(true));

    let (_, body, _) = app.json(Method::GET, &details, Some(&m), None).await;
    assert_eq!(body["userType"], json!("student_in_group"));
    assert_eq!(body["permissions"]["canUpload"], json!(true));
    assert_eq!(body["hasRated"], json!(false));
}

#[tokio::test]
async fn students_cannot_use_staff_endpoints() {
    let app = TestApp::new();
    let (student, x) = app.with_conn(|conn| {
        let red = insert_group(conn, "Red");
        let x = insert_presentation(conn, &red, "X");
        let student = insert_user_with_password(
            conn,
            "s",
            Role::Student,
            Some(&red),
            PASSWORD,
        );
        (student, x)
    });
    let s = app.login("s", PASSWORD).await;

    let attempts = [
        (Method::GET, "/api/students".to_string(), None),
        (
            Method::POST,
            format!("/api/students/{student}/reset-password"),
            None,
        ),
        (
            Method::PUT,
            format!("/api/students/{student}/group"),
            Some(json!({ "groupId": null })),
        ),
        (Method::POST, "/api/groups".to_string(), Some(json!({ "name": "G" }))),
        (Method::GET, "/api/groups/not-passed".to_string(), None),
        (
            Method::PUT,
            format!("/api/presentations/{x}/feedback"),
            Some(json!({ "feedback": "nice" })),
        ),
        (
            Method::PUT,
            format!("/api/presentations/{x}/toggle-active"),
            None,
        ),
    ];

    for (method, uri, body) in attempts {
        let (status, res, _) = app.json(method, &uri, Some(&s), body).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}: {res}");
    }

    // and nothing changed
    app.with_conn(|conn| {
        let memberships = group_members::table
            .filter(group_members::user_id.eq(&student))
            .count()
            .get_result::<i64>(conn)
            .unwrap();
        assert_eq!(memberships, 1);
    });
}

#[tokio::test]
async fn teachers_manage_groups_and_export_unpassed_ones() {
    let app = TestApp::new();
    let (student, blue) = app.with_conn(|conn| {
        let red = insert_group(conn, "Red");
        let blue = insert_group(conn, "Blue");
        insert_user_with_password(conn, "t", Role::Teacher, None, PASSWORD);
        let student = insert_user_with_password(
            conn,
            "turing",
            Role::Student,
            Some(&red),
            PASSWORD,
        );
        (student, blue)
    });
    let t = app.login("t", PASSWORD).await;

    let (status, body, _) = app
        .json(
            Method::PUT,
            &format!("/api/students/{student}/group"),
            Some(&t),
            Some(json!({ "groupId": blue })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["group"]["name"], json!("Blue"));

    let (_, body, _) = app
        .json(Method::GET, "/api/students", Some(&t), None)
        .await;
    assert_eq!(body["students"][0]["groupName"], json!("Blue"));

    let (_, body, _) = app
        .json(Method::GET, "/api/groups/all-group", Some(&t), None)
        .await;
    let groups = body["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    let blue_count = groups
        .iter()
        .find(|g| g["name"] == json!("Blue"))
        .map(|g| g["memberCount"].clone());
    assert_eq!(blue_count, Some(json!(1)));

    // a new presentation, then a grade: Blue has passed, Red has not
    let (status, body, _) = app
        .json(
            Method::POST,
            &format!("/api/presentations/group/{blue}/auto"),
            Some(&t),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(
        body["presentation"]["title"],
        json!("Blue - Presentation 1")
    );
    let presentation = body["presentation"]["id"].as_str().unwrap().to_string();
    assert_status!(
        app.json(
            Method::POST,
            &format!("/api/presentations/{presentation}/rate"),
            Some(&t),
            Some(json!({ "rating": 15 })),
        )
        .await,
        StatusCode::OK
    );
    let (_, body, _) = app
        .json(
            Method::GET,
            &format!("/api/presentations/details/{presentation}"),
            Some(&t),
            None,
        )
        .await;
    assert_eq!(body["userType"], json!("teacher"));
    assert_eq!(body["hasRated"], json!(false));

    let res = app
        .send(
            Request::builder()
                .uri("/api/groups/not-passed/download")
                .header(COOKIE, &t)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(
        res.headers()[CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );
    let csv = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&csv[..], b"Group,Members\nRed,\n");

    // reset the student, who then signs in with the code
    let (status, body, _) = app
        .json(
            Method::POST,
            &format!("/api/students/{student}/reset-password"),
            Some(&t),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let code = body["resetCode"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 8);

    assert_status!(
        app.json(
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "name": "turing", "password": PASSWORD })),
        )
        .await,
        StatusCode::UNAUTHORIZED
    );
    let (_, body, _) = app
        .json(
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "name": "turing", "password": code })),
        )
        .await;
    assert_eq!(body["requirePasswordReset"], json!(true));
}

#[tokio::test]
async fn uploaded_files_can_be_downloaded() {
    let app = TestApp::new();
    app.with_conn(|conn| {
        let red = insert_group(conn, "Red");
        let blue = insert_group(conn, "Blue");
        insert_user_with_password(conn, "m", Role::Student, Some(&red), PASSWORD);
        insert_user_with_password(conn, "o", Role::Student, Some(&blue), PASSWORD);
        insert_user_with_password(conn, "l", Role::Student, None, PASSWORD);
    });
    let m = app.login("m", PASSWORD).await;
    let o = app.login("o", PASSWORD).await;
    let l = app.login("l", PASSWORD).await;

    let upload = |cookie: &str, file_name: &str, bytes: &[u8]| {
        let boundary = "presdesk-boundary";
        Request::builder()
            .method(Method::POST)
            .uri("/api/upload-ppt")
            .header(COOKIE, cookie)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(multipart_body(
                boundary,
                &[("title", "Our deck"), ("description", "<b>Slides</b>")],
                Some(("pptFile", file_name, bytes)),
            )))
            .unwrap()
    };

    let res = app.send(upload(&m, "notes.docx", b"nope")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.send(upload(&l, "Deck.pdf", b"%PDF-1.7")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.send(upload(&m, "Final Deck.pdf", b"%PDF-1.7 slides")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(
        &axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap(),
    )
    .unwrap();
    assert!(
        body["path"]
            .as_str()
            .unwrap()
            .starts_with("presentations/final-deck-")
    );
    assert_eq!(body["presentation"]["title"], json!("Our deck"));
    assert_eq!(body["presentation"]["description"], json!("Slides"));
    let id = body["presentation"]["id"].as_str().unwrap().to_string();

    let download = |cookie: &str| {
        Request::builder()
            .uri(format!("/api/presentations/{id}/download"))
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    };

    let res = app.send(download(&o)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()[CONTENT_DISPOSITION],
        "attachment; filename=\"Final Deck.pdf\""
    );
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"%PDF-1.7 slides");

    let res = app.send(download(&l)).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let (_, body, _) = app
        .json(Method::GET, "/api/presentations/my-group", Some(&m), None)
        .await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    let (_, body, _) = app
        .json(Method::GET, "/api/presentations/my-group", Some(&l), None)
        .await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn members_edit_descriptions_and_teachers_toggle_visibility() {
    let app = TestApp::new();
    let x = app.with_conn(|conn| {
        let red = insert_group(conn, "Red");
        let blue = insert_group(conn, "Blue");
        insert_user_with_password(conn, "m", Role::Student, Some(&red), PASSWORD);
        insert_user_with_password(conn, "o", Role::Student, Some(&blue), PASSWORD);
        insert_user_with_password(conn, "t", Role::Teacher, None, PASSWORD);
        insert_presentation(conn, &red, "X")
    });

    let server = TestServer::new(app.app.clone()).unwrap();
    let login = |name: &'static str| {
        let server = &server;
        async move {
            let res = server
                .post("/api/login")
                .json(&json!({ "name": name, "password": PASSWORD }))
                .await;
            assert_eq!(res.status_code(), StatusCode::OK);
            let cookie = res.header(header::SET_COOKIE);
            let cookie = cookie.to_str().unwrap().split(';').next().unwrap();
            HeaderValue::from_str(cookie).unwrap()
        }
    };
    let m = login("m").await;
    let o = login("o").await;
    let t = login("t").await;

    let description = format!("/api/presentations/{x}/description");
    let res = server
        .put(&description)
        .add_header(COOKIE, o.clone())
        .json(&json!({ "description": "hijacked" }))
        .await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);

    let res = server
        .put(&description)
        .add_header(COOKIE, m.clone())
        .json(&json!({ "description": "<script>x()</script>About <em>us</em>" }))
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.json::<Value>()["description"], json!("About us"));

    let res = server
        .put(&format!("/api/presentations/{x}/feedback"))
        .add_header(COOKIE, t.clone())
        .json(&json!({ "feedback": "Clear and well paced." }))
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);

    let res = server
        .put(&format!("/api/presentations/{x}/toggle-active"))
        .add_header(COOKIE, t.clone())
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.json::<Value>()["presentation"]["active"], json!(false));

    let res = server
        .get("/api/presentations/active")
        .add_header(COOKIE, m.clone())
        .await;
    assert_eq!(res.json::<Value>(), json!([]));

    let res = server
        .get(&format!("/api/presentations/details/{x}"))
        .add_header(COOKIE, t)
        .await;
    let body = res.json::<Value>();
    assert_eq!(body["presentation"]["description"], json!("About us"));
    assert_eq!(
        body["presentation"]["feedback"],
        json!("Clear and well paced.")
    );
    assert_eq!(body["userType"], json!("teacher"));
    assert_eq!(body["permissions"]["canAddFeedback"], json!(true));
}
